
#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use crate::keys::{PrivateKey, PublicKey};
    use crate::sealed::{seal, unseal, BLOCK_SIZE};

    proptest! {
        #[test]
        fn test_seal_round_trip_any_payload(
            plaintext in any::<Vec<u8>>(),
            nonce in any::<u64>()
        ) {
            let app = PrivateKey::generate();
            let authenticator = PrivateKey::generate();

            let sealed = seal(&plaintext, &app, &authenticator.public_key(), nonce);
            let opened = unseal(&sealed, &authenticator, &app.public_key(), nonce).unwrap();

            prop_assert_eq!(opened, plaintext);
        }

        #[test]
        fn test_sealed_length_is_one_padded_block_multiple(
            plaintext in any::<Vec<u8>>(),
            nonce in any::<u64>()
        ) {
            let key = PrivateKey::generate();
            let sealed = seal(&plaintext, &key, &key.public_key(), nonce);

            prop_assert!(!sealed.is_empty());
            prop_assert_eq!(sealed.len() % BLOCK_SIZE, 0);
            // PKCS7 adds between 1 and 16 bytes, never zero.
            prop_assert!(sealed.len() > plaintext.len());
            prop_assert!(sealed.len() <= plaintext.len() + BLOCK_SIZE);
        }

        #[test]
        fn test_seal_is_deterministic(
            plaintext in any::<Vec<u8>>(),
            nonce in any::<u64>()
        ) {
            let key = PrivateKey::generate();

            let first = seal(&plaintext, &key, &key.public_key(), nonce);
            let second = seal(&plaintext, &key, &key.public_key(), nonce);

            prop_assert_eq!(first, second);
        }

        #[test]
        fn test_distinct_nonces_distinct_ciphertexts(
            plaintext in any::<Vec<u8>>(),
            n1 in any::<u64>(),
            n2 in any::<u64>()
        ) {
            prop_assume!(n1 != n2);
            let key = PrivateKey::generate();

            let c1 = seal(&plaintext, &key, &key.public_key(), n1);
            let c2 = seal(&plaintext, &key, &key.public_key(), n2);

            prop_assert_ne!(c1, c2);
        }

        #[test]
        fn test_shared_secret_symmetry(
            a_seed in any::<[u8; 32]>(),
            b_seed in any::<[u8; 32]>()
        ) {
            prop_assume!(PrivateKey::from_bytes(&a_seed).is_ok());
            prop_assume!(PrivateKey::from_bytes(&b_seed).is_ok());
            let a = PrivateKey::from_bytes(&a_seed).unwrap();
            let b = PrivateKey::from_bytes(&b_seed).unwrap();

            let ab = a.shared_secret(&b.public_key());
            let ba = b.shared_secret(&a.public_key());

            prop_assert_eq!(ab.as_bytes(), ba.as_bytes());
        }

        #[test]
        fn test_public_key_hex_round_trip(seed in any::<[u8; 32]>()) {
            prop_assume!(PrivateKey::from_bytes(&seed).is_ok());
            let key = PrivateKey::from_bytes(&seed).unwrap().public_key();

            let parsed: PublicKey = key.to_string().parse().unwrap();
            prop_assert_eq!(parsed, key);
        }
    }
}
