use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// Base64 of the big-endian CRC32C (Castagnoli) of `data`. This is the
/// encoding GCS uses in the `crc32c` object attribute and `X-Goog-Hash`.
pub fn encoded_crc32c(data: &[u8]) -> String {
    BASE64.encode(crc32c::crc32c(data).to_be_bytes())
}

/// Base64 of the MD5 digest of `data`. Doubles as the object etag.
pub fn encoded_md5(data: &[u8]) -> String {
    BASE64.encode(md5::compute(data).0)
}

/// Hex MD5, used for multipart part comparison against client-sent
/// `Content-MD5` values that arrive in either encoding.
pub fn hex_md5(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Incremental checksummer for bodies consumed in chunks.
pub struct Checksummer {
    crc: u32,
    md5: md5::Context,
    size: u64,
}

impl Checksummer {
    pub fn new() -> Self {
        Checksummer {
            crc: 0,
            md5: md5::Context::new(),
            size: 0,
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.crc = crc32c::crc32c_append(self.crc, chunk);
        self.md5.consume(chunk);
        self.size += chunk.len() as u64;
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// (base64 crc32c, base64 md5)
    pub fn finish(self) -> (String, String) {
        let crc = BASE64.encode(self.crc.to_be_bytes());
        let md5 = BASE64.encode(self.md5.compute().0);
        (crc, md5)
    }
}

impl Default for Checksummer {
    fn default() -> Self {
        Self::new()
    }
}
