//! Assorted utility functions.

use std::{
    fs::File,
    io::{Read, Write},
};

use crate::error::Error;

/// Reads the contents of the file at the given path into
/// a vector of bytes.
pub fn read_file(path: &str) -> Result<Vec<u8>, Error> {
    let mut file = File::open(path)
        .map_err(|_| Error::CustomError(format!("Failed to open file: {}", path)))?;
    let mut data = Vec::new();
    file.read_to_end(&mut data)
        .map_err(|_| Error::CustomError(format!("Failed to read from file: {}", path)))?;
    Ok(data)
}

/// Writes the given data to the file at the given path.
pub fn write_file(path: &str, data: &[u8]) -> Result<(), Error> {
    let mut file = File::create(path)
        .map_err(|_| Error::CustomError(format!("Failed to create file: {}", path)))?;
    file.write_all(data)
        .map_err(|_| Error::CustomError(format!("Failed to write to file: {}", path)))?;
    file.flush()
        .map_err(|_| Error::CustomError(format!("Failed to flush file: {}", path)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::read_file;

    #[test]
    fn test_read_file_missing() {
        let result = read_file("/path/that/does/not/exist.bin");
        assert!(result.is_err());
    }
}
