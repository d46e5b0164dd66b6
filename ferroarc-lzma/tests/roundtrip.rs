//! End-to-end tests for the LZMA coders.

use ferroarc_core::coder::{CoderStatus, Compressor, Decompressor};
use ferroarc_lzma::{
    LzmaDecoder, LzmaEncoder, LzmaLevel, LzmaOptions, LzmaProps, Normalization, ParserMode,
    compress, compress_bytes, compress_raw, decompress_bytes, decompress_raw,
};

fn options_64k() -> LzmaOptions {
    LzmaOptions {
        dict_size: 1 << 16,
        ..LzmaOptions::default()
    }
}

#[test]
fn test_empty_input() {
    let compressed = compress_bytes(b"", LzmaLevel::DEFAULT).unwrap();
    assert_eq!(decompress_bytes(&compressed).unwrap(), b"");
}

#[test]
fn test_single_byte_stream_layout() {
    let compressed = compress(b"A", &options_64k()).unwrap();
    // props = (pb * 5 + lp) * 9 + lc = (2 * 5 + 0) * 9 + 3 = 0x5D
    assert_eq!(compressed[0], 0x5D);
    assert_eq!(&compressed[1..5], &0x0001_0000u32.to_le_bytes());
    assert_eq!(&compressed[5..13], &1u64.to_le_bytes());
    assert_eq!(decompress_bytes(&compressed).unwrap(), b"A");
}

#[test]
fn test_run_of_identical_bytes() {
    let original = vec![b'A'; 1000];
    let compressed = compress_bytes(&original, LzmaLevel::DEFAULT).unwrap();
    assert!(compressed.len() < 100, "got {} bytes", compressed.len());
    assert_eq!(decompress_bytes(&compressed).unwrap(), original);
}

#[test]
fn test_repeated_phrase() {
    let original: Vec<u8> = b"The quick brown fox "
        .iter()
        .cycle()
        .take(1000)
        .copied()
        .collect();
    let compressed = compress_bytes(&original, LzmaLevel::DEFAULT).unwrap();
    assert!(compressed.len() < 200, "got {} bytes", compressed.len());
    assert_eq!(decompress_bytes(&compressed).unwrap(), original);
}

#[test]
fn test_every_byte_value() {
    let original: Vec<u8> = (0u8..=255).cycle().take(1024).collect();
    let compressed = compress_bytes(&original, LzmaLevel::DEFAULT).unwrap();
    assert_eq!(decompress_bytes(&compressed).unwrap(), original);
}

#[test]
fn test_two_byte_tail_match() {
    // Mostly unique data whose last two bytes repeat an earlier pair.
    let mut original = Vec::new();
    let mut seed = 0x0123_4567_89AB_CDEFu64;
    for _ in 0..500 {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        original.push((seed >> 33) as u8);
    }
    let pair = [original[100], original[101]];
    original.extend_from_slice(&pair);

    let compressed = compress_bytes(&original, LzmaLevel::DEFAULT).unwrap();
    assert_eq!(decompress_bytes(&compressed).unwrap(), original);
}

#[test]
fn test_nonuniform_props_roundtrip() {
    for (lc, lp, pb) in [(0, 0, 0), (8, 0, 4), (0, 4, 0), (1, 2, 3), (4, 1, 1)] {
        let options = LzmaOptions {
            props: LzmaProps::new(lc, lp, pb),
            dict_size: 1 << 14,
            ..LzmaOptions::preset(LzmaLevel::new(2))
        };
        let original: Vec<u8> = b"abcabcabc-XYZXYZ-abcabc 123 123 123"
            .iter()
            .cycle()
            .take(2000)
            .copied()
            .collect();
        let compressed = compress(&original, &options).unwrap();
        assert_eq!(
            decompress_bytes(&compressed).unwrap(),
            original,
            "lc={} lp={} pb={}",
            lc,
            lp,
            pb
        );
    }
}

#[test]
fn test_both_variants_decode_with_one_decoder() {
    let original: Vec<u8> = b"normalize me, normalize me, normalize me "
        .iter()
        .cycle()
        .take(5000)
        .copied()
        .collect();

    let mut streams = Vec::new();
    for variant in [Normalization::NormalizeAfter, Normalization::NormalizeBefore] {
        let options = LzmaOptions {
            variant,
            ..options_64k()
        };
        streams.push(compress(&original, &options).unwrap());
    }

    for stream in &streams {
        assert_eq!(decompress_bytes(stream).unwrap(), original);
    }
}

#[test]
fn test_normal_parser_not_worse_than_fast() {
    let original: Vec<u8> = b"The quick brown fox jumps over the lazy dog. "
        .iter()
        .cycle()
        .take(4000)
        .copied()
        .collect();

    let fast = compress(
        &original,
        &LzmaOptions {
            mode: ParserMode::Fast,
            ..options_64k()
        },
    )
    .unwrap();
    let normal = compress(
        &original,
        &LzmaOptions {
            mode: ParserMode::Normal,
            ..options_64k()
        },
    )
    .unwrap();

    assert!(
        normal.len() <= fast.len(),
        "normal {} > fast {}",
        normal.len(),
        fast.len()
    );
    assert_eq!(decompress_bytes(&fast).unwrap(), original);
    assert_eq!(decompress_bytes(&normal).unwrap(), original);
}

#[test]
fn test_eos_leaves_trailing_bytes() {
    let original = b"stop right after the marker";
    let options = options_64k();
    let mut stream = compress_raw(original, &options).unwrap();
    let stream_len = stream.len();
    let junk = vec![0xA5u8; 128];
    stream.extend_from_slice(&junk);

    // One call with the whole buffer: the marker ends decoding while
    // plenty of input is still on the table.
    let mut decoder = LzmaDecoder::new(options.props, options.dict_size, None).unwrap();
    let mut out = vec![0u8; 256];
    let (consumed, produced, status) = decoder.decompress(&stream, &mut out).unwrap();

    assert_eq!(status, CoderStatus::StreamEnd);
    assert_eq!(&out[..produced], original);
    // Everything past the marker stays in the input buffer.
    assert!(consumed <= stream_len);
    assert!(stream.len() - consumed >= junk.len());
}

#[test]
fn test_raw_roundtrip_with_known_size() {
    let original = b"raw payload, properties travel out of band";
    let options = options_64k();
    let raw = compress_raw(original, &options).unwrap();
    let decoded = decompress_raw(
        &raw[..],
        options.props,
        options.dict_size,
        Some(original.len() as u64),
    )
    .unwrap();
    assert_eq!(decoded, original);
}

#[test]
fn test_declared_size_cuts_decoding_short() {
    // Declare fewer bytes than the stream encodes: decoding stops there.
    let original = b"0123456789";
    let options = options_64k();
    let raw = compress_raw(original, &options).unwrap();
    let decoded = decompress_raw(&raw[..], options.props, options.dict_size, Some(4)).unwrap();
    assert_eq!(decoded, b"0123");
}

#[test]
fn test_stepped_decode_with_tiny_buffers() {
    let original: Vec<u8> = b"streaming in small pieces "
        .iter()
        .cycle()
        .take(3000)
        .copied()
        .collect();
    let compressed = compress_bytes(&original, LzmaLevel::new(3)).unwrap();

    let mut decoder = LzmaDecoder::with_header();
    let mut out = Vec::new();
    let mut chunk = [0u8; 7];
    let mut offset = 0;
    loop {
        // Feed 11 input bytes at a time and drain 7 output bytes at a time.
        let end = (offset + 11).min(compressed.len());
        let input = &compressed[offset..end];
        let feed: &[u8] = if input.is_empty() { &[] } else { input };
        let (consumed, produced, status) = decoder.decompress(feed, &mut chunk).unwrap();
        offset += consumed.min(input.len());
        out.extend_from_slice(&chunk[..produced]);
        if status == CoderStatus::StreamEnd {
            break;
        }
    }
    assert_eq!(out, original);
}

#[test]
fn test_stepped_encode_matches_one_shot() {
    let original: Vec<u8> = b"one shot or many steps, same bytes "
        .iter()
        .cycle()
        .take(2000)
        .copied()
        .collect();
    let one_shot = compress(&original, &options_64k()).unwrap();

    let mut encoder = LzmaEncoder::with_options(&options_64k()).unwrap();
    let mut stepped = Vec::new();
    let mut chunk = [0u8; 13];
    // Feed the input in two halves, then drain.
    let (a, b) = original.split_at(original.len() / 2);
    let (consumed, _, status) = encoder.compress(a, &mut chunk, false).unwrap();
    assert_eq!(consumed, a.len());
    assert_eq!(status, CoderStatus::NeedMoreInput);
    let mut fed_rest = false;
    loop {
        let input: &[u8] = if fed_rest { &[] } else { b };
        let (_, produced, status) = encoder.compress(input, &mut chunk, true).unwrap();
        fed_rest = true;
        stepped.extend_from_slice(&chunk[..produced]);
        if status == CoderStatus::StreamEnd {
            break;
        }
    }
    assert_eq!(stepped, one_shot);
}

#[test]
fn test_large_mixed_input() {
    let mut original = Vec::new();
    let mut seed = 0xFEED_FACE_CAFE_BEEFu64;
    // Alternating compressible and noisy sections.
    for section in 0..16 {
        if section % 2 == 0 {
            original.extend(std::iter::repeat_n(b'=', 4096));
        } else {
            for _ in 0..1024 {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
                original.push((seed >> 33) as u8);
            }
        }
    }
    for level in [0, 3, 6] {
        let compressed = compress_bytes(&original, LzmaLevel::new(level)).unwrap();
        assert_eq!(
            decompress_bytes(&compressed).unwrap(),
            original,
            "level {}",
            level
        );
    }
}
