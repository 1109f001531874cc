use sha2::{Digest, Sha256};

/// Incrementally calculates the sha256 digest and length of a byte stream as it is written.
pub struct Digester {
    hasher: Sha256,
    bytes: u64,
}

impl Digester {
    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes += data.len() as u64;
    }

    #[inline]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn finish(self) -> ContentSummary {
        ContentSummary {
            size: self.bytes,
            sha256: format!("{:x}", self.hasher.finalize()),
        }
    }
}

impl Default for Digester {
    fn default() -> Self {
        Self {
            hasher: Sha256::new(),
            bytes: 0,
        }
    }
}

/// Size and digest of a fully written blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentSummary {
    pub size: u64,
    pub sha256: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn digest_is_independent_of_write_boundaries() {
        let mut whole = Digester::default();
        whole.update(b"abcdefghij");

        let mut pieces = Digester::default();
        pieces.update(b"abcd");
        pieces.update(b"");
        pieces.update(b"efgh");
        pieces.update(b"ij");

        assert_eq!(pieces.bytes(), 10);
        assert_eq!(whole.finish(), pieces.finish());
    }

    #[test]
    fn empty_digest() {
        let summary = Digester::default().finish();
        assert_eq!(summary.size, 0);
        assert_eq!(
            summary.sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
