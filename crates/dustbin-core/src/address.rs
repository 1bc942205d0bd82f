//! The external addressing scheme: `<trashId>-<fileId>[/<relativePath>]`.
//!
//! A decoded address names either a top-level trashed item (empty relative
//! path) or a file nested inside a trashed directory.

use crate::error::{Error, Result};

/// Decoded form of a trash address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub trash_id: u32,
    pub file_id: String,
    pub relative_path: String,
}

pub fn encode(trash_id: u32, file_id: &str, relative_path: &str) -> String {
    let mut address = format!("{}-{}", trash_id, file_id);
    if !relative_path.is_empty() {
        address.push('/');
        address.push_str(relative_path);
    }
    address
}

/// Exact inverse of [`encode`]. The trash id is everything before the
/// *first* dash (a file id may itself contain dashes); the relative path is
/// everything after the first slash following it.
pub fn decode(address: &str) -> Result<Address> {
    let malformed = || Error::MalformedAddress {
        address: address.to_string(),
    };

    let dash = address.find('-').ok_or_else(malformed)?;
    let trash_id: u32 = address[..dash].parse().map_err(|_| malformed())?;

    let rest = &address[dash + 1..];
    let (file_id, relative_path) = match rest.find('/') {
        Some(slash) => (&rest[..slash], &rest[slash + 1..]),
        None => (rest, ""),
    };
    if file_id.is_empty() {
        return Err(malformed());
    }

    Ok(Address {
        trash_id,
        file_id: file_id.to_string(),
        relative_path: relative_path.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(trash_id: u32, file_id: &str, relative_path: &str) {
        let address = encode(trash_id, file_id, relative_path);
        let decoded = decode(&address).unwrap();
        assert_eq!(decoded.trash_id, trash_id);
        assert_eq!(decoded.file_id, file_id);
        assert_eq!(decoded.relative_path, relative_path);
    }

    #[test]
    fn test_roundtrip_top_level() {
        roundtrip(0, "report.txt", "");
        roundtrip(3, "some dir", "");
    }

    #[test]
    fn test_roundtrip_nested() {
        roundtrip(0, "photos", "2024/trip/img_001.jpg");
        roundtrip(12, "a", "b");
    }

    #[test]
    fn test_file_id_with_dashes() {
        roundtrip(1, "my-old-notes.md", "");
        let decoded = decode("1-my-old-notes.md").unwrap();
        assert_eq!(decoded.file_id, "my-old-notes.md");
    }

    #[test]
    fn test_disambiguated_file_id() {
        roundtrip(0, "report.txt (1)", "nested/file");
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(matches!(
            decode("no dash here"),
            Err(Error::MalformedAddress { .. })
        ));
        assert!(matches!(
            decode("x-file"),
            Err(Error::MalformedAddress { .. })
        ));
        assert!(matches!(decode("0-"), Err(Error::MalformedAddress { .. })));
        assert!(matches!(
            decode("0-/nested"),
            Err(Error::MalformedAddress { .. })
        ));
        assert!(matches!(decode(""), Err(Error::MalformedAddress { .. })));
    }
}
