use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use bincode::Options;
use bytes::{Bytes, BytesMut};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use orion::aead::streaming::{Nonce, StreamOpener, StreamSealer, StreamTag};
use orion::kdf::SecretKey;
use orion::util::secure_rand_bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::common::error::error;
use crate::transfer::transport::MAX_FRAME_SIZE;

const CHALLENGE_LENGTH: usize = 16;
const AUTH_TIMEOUT: Duration = Duration::from_secs(15);

/// First message of the handshake; both sides send one.
#[derive(Serialize, Deserialize, Debug)]
struct AuthRequest {
    protocol: u32,
    role: Cow<'static, str>,
    #[serde(with = "serde_bytes")]
    challenge: Vec<u8>,
}

/// Proof that the peer knows the shared secret: its role and our challenge,
/// sealed with the stream key it will keep using afterwards.
#[derive(Serialize, Deserialize, Debug)]
struct AuthResponse {
    #[serde(with = "serde_bytes")]
    nonce: Vec<u8>,
    #[serde(with = "serde_bytes")]
    response: Vec<u8>,
}

/// Mutual challenge-response authentication over a framed socket.
///
/// Each side proves knowledge of the shared secret key by answering the
/// peer's random challenge; the sealers created for the proof stay in place
/// as the stream encryption of the connection.
pub async fn do_authentication<T: AsyncRead + AsyncWrite>(
    protocol: u32,
    my_role: &'static str,
    peer_role: &'static str,
    key: Arc<SecretKey>,
    writer: &mut SplitSink<Framed<T, LengthDelimitedCodec>, Bytes>,
    reader: &mut SplitStream<Framed<T, LengthDelimitedCodec>>,
) -> crate::Result<(StreamSealer, StreamOpener)> {
    let mut challenge = vec![0; CHALLENGE_LENGTH];
    secure_rand_bytes(&mut challenge).map_err(|_| "Generating challenge failed")?;

    let request = AuthRequest {
        protocol,
        role: Cow::Borrowed(my_role),
        challenge: challenge.clone(),
    };
    send_message(writer, serialize(&request)?.into()).await?;

    let peer_request: AuthRequest = deserialize(&receive_message(reader).await?)?;
    if peer_request.protocol != protocol {
        return error(format!(
            "Invalid version of protocol, expected {protocol}, got {}",
            peer_request.protocol
        ));
    }
    if peer_request.role != peer_role {
        return error(format!(
            "Expected peer role {peer_role}, got {}",
            peer_request.role
        ));
    }

    let (mut sealer, nonce) = StreamSealer::new(&key).map_err(|_| "Creating sealer failed")?;
    let mut proof = Vec::new();
    proof.extend_from_slice(my_role.as_bytes());
    proof.extend_from_slice(&peer_request.challenge);
    let response = sealer
        .seal_chunk(&proof, &StreamTag::Message)
        .map_err(|_| "Cannot seal challenge")?;
    let answer = AuthResponse {
        nonce: nonce.as_ref().into(),
        response,
    };
    send_message(writer, serialize(&answer)?.into()).await?;

    let peer_answer: AuthResponse = deserialize(&receive_message(reader).await?)?;
    let remote_nonce = Nonce::from_slice(&peer_answer.nonce).map_err(|_| "Invalid nonce")?;
    let mut opener =
        StreamOpener::new(&key, &remote_nonce).map_err(|_| "Failed to create opener")?;
    let (opened, tag) = opener
        .open_chunk(&peer_answer.response)
        .map_err(|_| "Cannot verify challenge")?;

    let mut expected = Vec::new();
    expected.extend_from_slice(peer_role.as_bytes());
    expected.extend_from_slice(&challenge);
    if tag != StreamTag::Message || opened != expected {
        return error("Received challenge response does not match".to_string());
    }

    log::debug!("Authentication with {peer_role} finished");
    Ok((sealer, opener))
}

async fn send_message<T: AsyncRead + AsyncWrite>(
    writer: &mut SplitSink<Framed<T, LengthDelimitedCodec>, Bytes>,
    data: Bytes,
) -> crate::Result<()> {
    timeout(AUTH_TIMEOUT, writer.send(data))
        .await
        .map_err(|_| "Sending authentication message timeouted")?
        .map_err(|_| "Sending authentication message failed")?;
    Ok(())
}

async fn receive_message<T: AsyncRead + AsyncWrite>(
    reader: &mut SplitStream<Framed<T, LengthDelimitedCodec>>,
) -> crate::Result<BytesMut> {
    timeout(AUTH_TIMEOUT, reader.next())
        .await
        .map_err(|_| "Authentication message did not arrive")?
        .ok_or_else(|| {
            crate::Error::from("The remote side closed connection without authentication")
        })?
        .map_err(|e| e.into())
}

pub fn seal_message(sealer: &mut StreamSealer, data: Bytes) -> Bytes {
    sealer
        .seal_chunk(&data, &StreamTag::Message)
        .expect("Sealing message failed")
        .into()
}

pub fn open_message<T: DeserializeOwned>(
    opener: &mut StreamOpener,
    message_data: &[u8],
) -> crate::Result<T> {
    let (message, tag) = opener
        .open_chunk(message_data)
        .map_err(|_| "Cannot decrypt message")?;
    if tag != StreamTag::Message {
        return error("Unexpected stream tag".to_string());
    }
    deserialize(&message)
}

#[inline]
pub fn serialize<T: Serialize + ?Sized>(value: &T) -> crate::Result<Vec<u8>> {
    bincode::DefaultOptions::new()
        .with_limit(MAX_FRAME_SIZE as u64)
        .with_fixint_encoding()
        .serialize(value)
        .map_err(|e| format!("Serialization failed: {e:?}").into())
}

#[inline]
pub fn deserialize<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> crate::Result<T> {
    bincode::DefaultOptions::new()
        .with_limit(MAX_FRAME_SIZE as u64)
        .with_fixint_encoding()
        .deserialize(bytes)
        .map_err(|e| format!("Deserialization failed: {e:?}").into())
}

pub fn generate_key() -> SecretKey {
    SecretKey::default()
}

pub fn serialize_key(key: &SecretKey) -> String {
    hex::encode(key.unprotected_as_bytes())
}

pub fn deserialize_key(text: &str) -> crate::Result<SecretKey> {
    let bytes =
        hex::decode(text).map_err(|_| "Secret key is not a valid hex string".to_string())?;
    SecretKey::from_slice(&bytes).map_err(|_| "Secret key has an invalid length".into())
}

#[cfg(test)]
mod tests {
    use super::{deserialize_key, generate_key, serialize_key};

    #[test]
    fn key_roundtrip() {
        let key = generate_key();
        let text = serialize_key(&key);
        let loaded = deserialize_key(&text).unwrap();
        assert_eq!(key.unprotected_as_bytes(), loaded.unprotected_as_bytes());
    }

    #[test]
    fn reject_malformed_key() {
        assert!(deserialize_key("not-hex").is_err());
        assert!(deserialize_key("abcd").is_err());
    }
}
