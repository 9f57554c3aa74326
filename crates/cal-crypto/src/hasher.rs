use cal_types::Digest;

/// Domain-separated BLAKE3 hasher.
///
/// Each hasher carries a domain tag that is prepended to every hash
/// computation, so a page and a chapter over identical bytes can never
/// produce the same digest.
#[derive(Clone, Copy, Debug)]
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for page records.
    pub const PAGE: Self = Self {
        domain: "cal-page-v1",
    };
    /// Hasher for chapter aggregates.
    pub const CHAPTER: Self = Self {
        domain: "cal-chapter-v1",
    };
    /// Hasher for book aggregates.
    pub const BOOK: Self = Self {
        domain: "cal-book-v1",
    };

    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> Digest {
        let mut hasher = self.start();
        hasher.update(data);
        Digest::from_hash(*hasher.finalize().as_bytes())
    }

    /// Verify that data produces the expected digest.
    pub fn verify(&self, data: &[u8], expected: &Digest) -> bool {
        self.hash(data) == *expected
    }

    /// A BLAKE3 hasher already primed with this domain's prefix.
    pub fn start(&self) -> blake3::Hasher {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher
    }

    pub fn domain(&self) -> &str {
        self.domain
    }
}
