//! Property-based roundtrip tests over randomized parameters and inputs.

use ferroarc_lzma::{
    LzmaLevel, LzmaOptions, LzmaProps, Normalization, compress, decode_lzma2, decompress_bytes,
    encode_lzma2,
};
use proptest::prelude::*;

fn arbitrary_input() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        // Uniform noise.
        proptest::collection::vec(any::<u8>(), 0..2048),
        // Few distinct symbols, long runs and repeats.
        proptest::collection::vec(prop_oneof![Just(b'a'), Just(b'b'), Just(b'c')], 0..4096),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn roundtrip_fast_any_props(
        lc in 0u32..=8,
        lp in 0u32..=4,
        pb in 0u32..=4,
        dict_shift in 12u32..=20,
        data in arbitrary_input(),
    ) {
        let options = LzmaOptions {
            props: LzmaProps::new(lc, lp, pb),
            dict_size: 1 << dict_shift,
            ..LzmaOptions::preset(LzmaLevel::new(1))
        };
        let compressed = compress(&data, &options).unwrap();
        let decompressed = decompress_bytes(&compressed).unwrap();
        prop_assert_eq!(decompressed, data);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn roundtrip_normal_parser(
        variant_before in any::<bool>(),
        data in proptest::collection::vec(prop_oneof![Just(b'x'), Just(b'y'), any::<u8>()], 0..1024),
    ) {
        let options = LzmaOptions {
            dict_size: 1 << 16,
            variant: if variant_before {
                Normalization::NormalizeBefore
            } else {
                Normalization::NormalizeAfter
            },
            ..LzmaOptions::preset(LzmaLevel::new(6))
        };
        let compressed = compress(&data, &options).unwrap();
        let decompressed = decompress_bytes(&compressed).unwrap();
        prop_assert_eq!(decompressed, data);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn roundtrip_lzma2(data in arbitrary_input()) {
        let options = LzmaOptions {
            dict_size: 1 << 16,
            ..LzmaOptions::preset(LzmaLevel::new(2))
        };
        let encoded = encode_lzma2(&data, &options).unwrap();
        let decoded = decode_lzma2(&encoded, 1 << 16).unwrap();
        prop_assert_eq!(decoded, data);
    }
}
