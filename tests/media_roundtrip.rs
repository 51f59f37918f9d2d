use std::io::Cursor;

use proptest::prelude::*;
use vaultkey::{
    decode, decrypt_file, encode, encrypt_file, generate_payload_key, PayloadKey, StreamDecryptor,
    StreamEncryptor, VaultkeyError,
};

#[test]
fn test_full_upload_flow_without_vault() {
    // Encrypting side.
    let key = generate_payload_key(None).unwrap();
    let media = vec![0x5Au8; 4096];
    let encrypted = encrypt_file(&media, &key).unwrap();
    let envelope_hex = encode(&key).unwrap().to_hex();
    drop(key);

    // Decrypting side sees only the hex envelope and the encrypted bytes.
    let envelope = vaultkey::Envelope::from_hex(&envelope_hex).unwrap();
    let recovered = decode(envelope.as_bytes()).unwrap().into_payload_key().unwrap();
    assert_eq!(decrypt_file(&encrypted, &recovered).unwrap(), media);
}

#[test]
fn test_large_media_roundtrip() {
    let key = generate_payload_key(None).unwrap();
    let media: Vec<u8> = (0..24 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();

    let encrypted = encrypt_file(&media, &key).unwrap();
    assert_eq!(encrypted.len(), media.len() + 28);
    assert_eq!(decrypt_file(&encrypted, &key).unwrap(), media);
}

#[test]
fn test_wrong_key_is_rejected() {
    let right = generate_payload_key(Some(b"right")).unwrap();
    let wrong = generate_payload_key(Some(b"wrong")).unwrap();
    let encrypted = encrypt_file(b"clip", &right).unwrap();
    assert!(matches!(decrypt_file(&encrypted, &wrong), Err(VaultkeyError::Decryption)));
}

#[test]
fn test_stream_matches_buffered_plaintext() {
    let key = PayloadKey::from_bytes([9; 32]);
    let media: Vec<u8> = (0..300_000u32).map(|i| (i * 7) as u8).collect();

    let mut sealed = Vec::new();
    let written = StreamEncryptor::with_chunk_size(64 * 1024)
        .unwrap()
        .encrypt(&key, Cursor::new(&media), &mut sealed)
        .unwrap();
    assert_eq!(written, media.len() as u64);

    let mut opened = Vec::new();
    StreamDecryptor::default()
        .decrypt(&key, Cursor::new(&sealed), &mut opened)
        .unwrap();
    assert_eq!(opened, media);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_file_roundtrip(media in proptest::collection::vec(any::<u8>(), 0..4096),
                           key_bytes in any::<[u8; 32]>()) {
        let key = PayloadKey::from_bytes(key_bytes);
        let encrypted = encrypt_file(&media, &key).unwrap();
        prop_assert_eq!(decrypt_file(&encrypted, &key).unwrap(), media);
    }

    #[test]
    fn prop_stream_roundtrip(media in proptest::collection::vec(any::<u8>(), 0..2048),
                             chunk in 1usize..300) {
        let key = PayloadKey::from_bytes([1; 32]);
        let mut sealed = Vec::new();
        StreamEncryptor::with_chunk_size(chunk).unwrap().encrypt(&key, &media[..], &mut sealed).unwrap();
        let mut opened = Vec::new();
        StreamDecryptor::default().decrypt(&key, &sealed[..], &mut opened).unwrap();
        prop_assert_eq!(opened, media);
    }
}
