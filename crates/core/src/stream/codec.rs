//! `multipart/x-mixed-replace` framing.
//!
//! Each frame becomes one part:
//!
//! ```text
//! --{boundary}\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: {len}\r\n
//! \r\n
//! {jpeg bytes}\r\n
//! ```

use bytes::{BufMut, Bytes, BytesMut};

/// `Content-Type` header value for the stream response.
pub fn content_type(boundary: &str) -> String {
    format!("multipart/x-mixed-replace; boundary={}", boundary)
}

/// Wrap one JPEG frame as a multipart part.
pub fn encode_part(boundary: &str, frame: &[u8]) -> Bytes {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        boundary,
        frame.len()
    );
    let mut out = BytesMut::with_capacity(header.len() + frame.len() + 2);
    out.put_slice(header.as_bytes());
    out.put_slice(frame);
    out.put_slice(b"\r\n");
    out.freeze()
}

/// Split a multipart body back into frames.
///
/// Relies on `Content-Length`, so frames may contain the boundary text.
/// Returns the frames and the number of trailing bytes that did not form a
/// complete part yet.
pub fn decode_parts(boundary: &str, body: &[u8]) -> (Vec<Bytes>, usize) {
    let delimiter = format!("--{}\r\n", boundary);
    let mut frames = Vec::new();
    let mut pos = 0;

    while body.len() - pos >= delimiter.len() {
        if !body[pos..].starts_with(delimiter.as_bytes()) {
            break;
        }
        let headers_start = pos + delimiter.len();
        let Some(headers_len) = find(&body[headers_start..], b"\r\n\r\n") else {
            break;
        };
        let headers = String::from_utf8_lossy(&body[headers_start..headers_start + headers_len]);
        let Some(len) = content_length(&headers) else {
            break;
        };

        let data_start = headers_start + headers_len + 4;
        // A bogus length cannot fit in the body either
        let Some(part_end) = data_start
            .checked_add(len)
            .and_then(|end| end.checked_add(2))
        else {
            break;
        };
        if body.len() < part_end {
            break;
        }
        frames.push(Bytes::copy_from_slice(&body[data_start..data_start + len]));
        pos = part_end;
    }

    (frames, body.len() - pos)
}

fn content_length(headers: &str) -> Option<usize> {
    headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.trim().eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type() {
        assert_eq!(
            content_type("frame"),
            "multipart/x-mixed-replace; boundary=frame"
        );
    }

    #[test]
    fn test_part_layout() {
        let part = encode_part("frame", b"abc");
        assert_eq!(
            &part[..],
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 3\r\n\r\nabc\r\n"
        );
    }

    #[test]
    fn test_decode_frames_containing_boundary_text() {
        let mut body = Vec::new();
        body.extend_from_slice(&encode_part("frame", b"--frame\r\n"));
        body.extend_from_slice(&encode_part("frame", b"second"));

        let (frames, rest) = decode_parts("frame", &body);
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], b"--frame\r\n");
        assert_eq!(&frames[1][..], b"second");
        assert_eq!(rest, 0);
    }

    #[test]
    fn test_decode_reports_incomplete_tail() {
        let mut body = encode_part("frame", b"first").to_vec();
        let second = encode_part("frame", b"second");
        body.extend_from_slice(&second[..second.len() - 4]);

        let (frames, rest) = decode_parts("frame", &body);
        assert_eq!(frames.len(), 1);
        assert_eq!(rest, second.len() - 4);
    }

    #[test]
    fn test_decode_stops_at_oversized_length() {
        let mut body = encode_part("frame", b"ok").to_vec();
        body.extend_from_slice(
            format!(
                "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\nxx\r\n",
                usize::MAX
            )
            .as_bytes(),
        );

        let (frames, rest) = decode_parts("frame", &body);
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"ok");
        assert!(rest > 0);
    }
}
