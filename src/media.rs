//! Media type detection for stored files.

const OCTET_STREAM: &str = "application/octet-stream";

/// Media type for a file.
///
/// The extension of `file_name` decides when it is known. Otherwise the
/// leading bytes of the content are sniffed, and anything unrecognised is
/// `application/octet-stream`.
pub fn detect(file_name: &str, head: &[u8]) -> String {
    if let Some(guess) = mime_guess::from_path(file_name).first() {
        return guess.essence_str().to_string();
    }
    infer::get(head)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| OCTET_STREAM.to_string())
}
