use blake2::{digest::typenum::U32, Blake2b, Digest};

pub fn blake2(data: &[u8]) -> [u8; 32] {
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Hash a sequence of byte chunks as if they were concatenated.
pub fn blake2_chunks<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> [u8; 32] {
    let mut hasher = Blake2b::<U32>::new();

    for chunk in chunks {
        hasher.update(chunk);
    }

    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_match_concatenation() {
        assert_eq!(
            blake2(b"network payload"),
            blake2_chunks([&b"network "[..], &b"payload"[..]])
        );
    }
}
