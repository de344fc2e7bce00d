use std::fmt;

use zeroize::Zeroize;

use super::provider::{AeadAlgorithm, Cipher};
use super::{Nonce, IV_LEN};
use crate::buffer::{Buf, TmpBuf};

/// One direction of record protection: an AEAD key, a 12-byte IV and a
/// sequence number.
///
/// The sequence number only advances when an operation succeeds, so a
/// failed open leaves the cipher usable for the next record.
pub(crate) struct RecordCipher {
    cipher: Box<dyn Cipher>,
    iv: [u8; IV_LEN],
    seq: u64,
    tag_len: usize,
}

impl RecordCipher {
    /// `material` is `key ‖ iv` as produced by the key schedule.
    pub fn new(aead: &dyn AeadAlgorithm, material: &[u8]) -> Result<Self, String> {
        let key_len = aead.key_len();
        if material.len() != key_len + IV_LEN {
            return Err(format!(
                "key material length {} != {}",
                material.len(),
                key_len + IV_LEN
            ));
        }
        let cipher = aead.create_cipher(&material[..key_len])?;
        let mut iv = [0u8; IV_LEN];
        iv.copy_from_slice(&material[key_len..]);
        Ok(RecordCipher {
            cipher,
            iv,
            seq: 0,
            tag_len: aead.tag_len(),
        })
    }

    pub fn tag_len(&self) -> usize {
        self.tag_len
    }

    /// Encrypt `buf` in place and append the tag.
    pub fn seal(&mut self, aad: &[u8], buf: &mut Buf) -> Result<(), String> {
        let nonce = Nonce::xor(&self.iv, self.seq);
        self.cipher.encrypt(buf, aad, nonce)?;
        self.seq += 1;
        Ok(())
    }

    /// Decrypt `data` in place, returning the plaintext length.
    pub fn open(&mut self, aad: &[u8], data: &mut [u8]) -> Result<usize, String> {
        if data.len() < self.tag_len {
            return Err(format!("ciphertext shorter than tag: {}", data.len()));
        }
        let nonce = Nonce::xor(&self.iv, self.seq);
        let mut tmp = TmpBuf::new(data);
        self.cipher.decrypt(&mut tmp, aad, nonce)?;
        self.seq += 1;
        Ok(tmp.len())
    }
}

impl Drop for RecordCipher {
    fn drop(&mut self) {
        self.iv.zeroize();
    }
}

impl fmt::Debug for RecordCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordCipher")
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::crypto::rust_crypto::AES_128_GCM;

    fn pair() -> (RecordCipher, RecordCipher) {
        let material = [7u8; 16 + IV_LEN];
        (
            RecordCipher::new(&AES_128_GCM, &material).unwrap(),
            RecordCipher::new(&AES_128_GCM, &material).unwrap(),
        )
    }

    #[test]
    fn seal_open_in_sequence() {
        let (mut tx, mut rx) = pair();
        for msg in [&b"first"[..], b"second"] {
            let mut buf = Buf::from_slice(msg);
            tx.seal(&[0x30], &mut buf).unwrap();
            let n = rx.open(&[0x30], &mut buf).unwrap();
            assert_eq!(&buf[..n], msg);
        }
    }

    #[test]
    fn failed_open_keeps_sequence() {
        let (mut tx, mut rx) = pair();
        let mut good = Buf::from_slice(b"payload");
        tx.seal(&[0x30], &mut good).unwrap();

        let mut bad = good.clone();
        bad[0] ^= 1;
        assert!(rx.open(&[0x30], &mut bad).is_err());

        let n = rx.open(&[0x30], &mut good).unwrap();
        assert_eq!(&good[..n], b"payload");
    }

    #[test]
    fn wrong_material_length() {
        assert!(RecordCipher::new(&AES_128_GCM, &[0; 16]).is_err());
    }
}
