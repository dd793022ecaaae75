// Property tests for the artifact transform pipeline

use backup_engine::transform::{self, EncryptionKey, TransformConfig};
use proptest::prelude::*;

fn config(compress: bool, encrypt: bool, key: &EncryptionKey, level: u32) -> TransformConfig {
    let mut config = TransformConfig::new();
    if compress {
        config = config.with_compression(level);
    }
    if encrypt {
        config = config.with_encryption(key.clone());
    }
    config
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn reverse_undoes_apply(
        data in proptest::collection::vec(any::<u8>(), 0..4096),
        compress in any::<bool>(),
        encrypt in any::<bool>(),
        level in 0u32..=9,
    ) {
        let key = EncryptionKey::generate();
        let config = config(compress, encrypt, &key, level);

        let output = transform::apply(&data, &config).unwrap();
        prop_assert_eq!(&output.checksum, &transform::checksum(&output.artifact));

        let restored = transform::reverse(&output.artifact, &config).unwrap();
        prop_assert_eq!(restored.as_ref(), data.as_slice());
    }

    #[test]
    fn any_flipped_byte_breaks_the_checksum(
        data in proptest::collection::vec(any::<u8>(), 1..1024),
        position in any::<prop::sample::Index>(),
    ) {
        let output = transform::apply(&data, &TransformConfig::new().with_compression(6)).unwrap();
        let mut tampered = output.artifact.to_vec();
        let index = position.index(tampered.len());
        tampered[index] ^= 0x01;
        prop_assert_ne!(transform::checksum(&tampered), output.checksum);
    }

    #[test]
    fn sealed_artifacts_reject_a_different_key(
        data in proptest::collection::vec(any::<u8>(), 0..512),
    ) {
        let writer = config(true, true, &EncryptionKey::generate(), 6);
        let reader = config(true, true, &EncryptionKey::generate(), 6);

        let output = transform::apply(&data, &writer).unwrap();
        prop_assert!(transform::reverse(&output.artifact, &reader).is_err());
    }
}
