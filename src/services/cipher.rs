//! Per-object symmetric secrets and the streaming encrypt/decrypt transform.
//!
//! Each archived file gets a fresh ChaCha20 key and nonce. The cipher is a
//! keystream, so encryption and decryption are the same operation and work on
//! arbitrarily sized chunks without buffering the whole object.

use bytes::Bytes;
use chacha20::{
    ChaCha20,
    cipher::{KeyIvInit, StreamCipher},
};
use futures::{Stream, StreamExt, pin_mut};
use rand::{RngCore, rngs::OsRng};
use std::{fmt, io, path::Path};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const KEY_LEN: usize = 32;
pub const IV_LEN: usize = 12;

const CHUNK_SIZE: usize = 64 * 1024;

/// Key + IV material for exactly one remote object.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Secret {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl Secret {
    /// Fresh random secret from the OS RNG.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    pub fn from_parts(key: [u8; KEY_LEN], iv: [u8; IV_LEN]) -> Self {
        Self { key, iv }
    }

    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn iv(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    /// A keystream positioned at the start of the object.
    pub fn keystream(&self) -> Keystream {
        Keystream(ChaCha20::new(&self.key.into(), &self.iv.into()))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// Stateful keystream; successive calls continue where the last one stopped.
pub struct Keystream(ChaCha20);

impl Keystream {
    pub fn apply(&mut self, buf: &mut [u8]) {
        self.0.apply_keystream(buf);
    }
}

/// Pipe `reader` through the keystream into `writer` in fixed-size chunks.
pub async fn transform<R, W>(secret: &Secret, reader: &mut R, writer: &mut W) -> io::Result<u64>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut keystream = secret.keystream();
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        keystream.apply(&mut buf[..n]);
        writer.write_all(&buf[..n]).await?;
        total += n as u64;
    }
    writer.flush().await?;
    Ok(total)
}

/// Encrypt `src` into a newly created `dst`, fsyncing before returning.
pub async fn encrypt_file(secret: &Secret, src: &Path, dst: &Path) -> io::Result<u64> {
    let mut input = File::open(src).await?;
    let mut output = File::create(dst).await?;
    let written = transform(secret, &mut input, &mut output).await?;
    output.sync_all().await?;
    Ok(written)
}

/// Decrypt a remote byte stream into `writer` as chunks arrive.
///
/// Any stream error is returned as-is; the caller owns cleanup of whatever
/// was already written.
pub async fn decrypt_stream<S, W>(secret: &Secret, stream: S, writer: &mut W) -> io::Result<u64>
where
    S: Stream<Item = io::Result<Bytes>>,
    W: AsyncWrite + Unpin,
{
    let mut keystream = secret.keystream();
    let mut buf = Vec::with_capacity(CHUNK_SIZE);
    let mut total = 0u64;
    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buf.clear();
        buf.extend_from_slice(&chunk);
        keystream.apply(&mut buf);
        writer.write_all(&buf).await?;
        total += buf.len() as u64;
    }
    writer.flush().await?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[tokio::test]
    async fn chunked_decrypt_reverses_encrypt() {
        let secret = Secret::generate();
        let plain = sample(CHUNK_SIZE * 2 + 123);

        let mut cipher = Vec::new();
        transform(&secret, &mut plain.as_slice(), &mut cipher)
            .await
            .unwrap();
        assert_ne!(cipher, plain);

        // Uneven chunk boundaries must not disturb the keystream position.
        let chunks: Vec<io::Result<Bytes>> = cipher
            .chunks(1000)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let mut restored = Vec::new();
        let n = decrypt_stream(&secret, stream::iter(chunks), &mut restored)
            .await
            .unwrap();

        assert_eq!(n as usize, plain.len());
        assert_eq!(restored, plain);
    }

    #[test]
    fn generated_secrets_differ() {
        assert_ne!(Secret::generate(), Secret::generate());
    }

    #[tokio::test]
    async fn decrypt_surfaces_stream_error() {
        let secret = Secret::generate();
        let chunks = vec![
            Ok(Bytes::from_static(b"abc")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
        ];
        let mut out = Vec::new();
        let err = decrypt_stream(&secret, stream::iter(chunks), &mut out)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}
