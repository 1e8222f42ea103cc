use truthlens_detect::{analyze, parse_predictions, sha256_hex, ImageKind, Prediction};

#[test]
fn parse_prediction_array() {
    let body = br#"[{"label":"AI-generated","score":0.8},{"label":"Real","score":0.2}]"#;
    let got = parse_predictions(body).expect("parse");
    assert_eq!(got.len(), 2);
    assert_eq!(got[0].label, "AI-generated");
    assert!((got[1].score - 0.2).abs() < 1e-9);
}

#[test]
fn parse_batched_array_is_unwrapped() {
    let body = br#"[[{"label":"Real","score":0.95}]]"#;
    let got = parse_predictions(body).expect("parse");
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].label, "Real");
}

#[test]
fn parse_single_prediction_object() {
    let body = br#"{"label":"fake","score":0.7}"#;
    let got = parse_predictions(body).expect("parse");
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].label, "fake");
}

#[test]
fn parse_error_object_surfaces_api_message() {
    let body = br#"{"error":"Model is currently loading","estimated_time":17.5}"#;
    let err = parse_predictions(body).unwrap_err().to_string();
    assert!(
        err.contains("currently loading"),
        "expected API message, got: {err}"
    );
    assert!(
        err.contains("17.5"),
        "expected estimated_time, got: {err}"
    );
}

#[test]
fn parse_non_json_includes_body_preview() {
    let err = parse_predictions(b"<html>Bad Gateway</html>")
        .unwrap_err()
        .to_string();
    assert!(
        err.contains("Bad Gateway"),
        "expected body preview, got: {err}"
    );
}

#[test]
fn parse_unexpected_shape_is_an_error() {
    let err = parse_predictions(br#"{"status":"queued"}"#)
        .unwrap_err()
        .to_string();
    assert!(
        err.contains("unexpected response shape"),
        "got: {err}"
    );
}

fn pred(label: &str, score: f64) -> Prediction {
    Prediction {
        label: label.to_string(),
        score,
    }
}

#[test]
fn analyze_ai_label_carries_probability() {
    let got = analyze(&[pred("Real", 0.1), pred("AI-generated", 0.9)]).expect("analyze");
    assert_eq!(got.label, "AI-generated");
    assert!((got.ai_probability - 0.9).abs() < 1e-9);
    assert!(!got.authentic);

    let got = analyze(&[pred("AI-generated", 0.2), pred("Real", 0.8)]).expect("analyze");
    assert!(got.authentic);
}

#[test]
fn analyze_real_label_is_inverted() {
    let got = analyze(&[pred("Real", 0.95)]).expect("analyze");
    assert_eq!(got.label, "Real");
    assert!((got.ai_probability - 0.05).abs() < 1e-9);
    assert!(got.authentic);
}

#[test]
fn analyze_falls_back_to_top_prediction() {
    let got = analyze(&[pred("cityscape", 0.6), pred("sketch", 0.4)]).expect("analyze");
    assert_eq!(got.label, "cityscape");
    assert!((got.ai_probability - 0.6).abs() < 1e-9);
    assert!(got.authentic);
}

#[test]
fn analyze_matches_ai_inside_longer_words() {
    let got = analyze(&[pred("landscape", 0.7), pred("portrait", 0.3)]).expect("analyze");
    assert_eq!(got.label, "portrait");
    assert!((got.ai_probability - 0.3).abs() < 1e-9);
    assert!(got.authentic);
}

#[test]
fn analyze_empty_is_an_error() {
    let err = analyze(&[]).unwrap_err().to_string();
    assert!(err.contains("empty prediction list"), "got: {err}");
}

#[test]
fn sniff_common_image_magics() {
    assert_eq!(
        ImageKind::sniff(&[0xFF, 0xD8, 0xFF, 0xE0]),
        Some(ImageKind::Jpeg)
    );
    assert_eq!(
        ImageKind::sniff(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A]),
        Some(ImageKind::Png)
    );
    assert_eq!(ImageKind::sniff(b"GIF89a"), Some(ImageKind::Gif));
    assert_eq!(
        ImageKind::sniff(b"RIFF\x00\x00\x00\x00WEBPVP8 "),
        Some(ImageKind::Webp)
    );
    assert_eq!(ImageKind::sniff(b"not an image"), None);
    assert_eq!(ImageKind::sniff(b"RIFF\x00\x00\x00\x00WAVE"), None);
}

#[test]
fn sha256_hex_known_vector() {
    assert_eq!(
        sha256_hex(b"abc"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}
