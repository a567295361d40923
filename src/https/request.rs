//! Wire-level framing for temperature report requests.
//!
//! The collector expects a fixed POST envelope followed by a single-field
//! JSON body:
//!
//! ```text
//! POST /temperature HTTP/1.1\r\n
//! Host: <host>\r\n
//! User-Agent: thermo-reporter/0.1\r\n
//! Content-Type: application/json\r\n
//! Content-Length: <N>\r\n
//! \r\n
//! {"temperature": <reading, 2 decimals>}
//! ```

/// Fixed client identifier sent with every report.
const USER_AGENT: &str = "thermo-reporter/0.1";

/// Upper bound on a framed request. Readings in the supported range stay far
/// below this; exceeding it means a precondition was violated upstream.
const MAX_REQUEST_LEN: usize = 512;

/// Build the complete request for one reading. Pure transform; the returned
/// buffer is owned by the report attempt and discarded afterwards.
pub fn build_report(host: &str, reading: f32) -> Vec<u8> {
    let body = format!("{{\"temperature\": {:.2}}}", reading);
    let request = format!(
        "POST /temperature HTTP/1.1\r\n\
         Host: {}\r\n\
         User-Agent: {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         \r\n\
         {}",
        host,
        USER_AGENT,
        body.len(),
        body
    );
    assert!(
        request.len() <= MAX_REQUEST_LEN,
        "framed request ({} bytes) exceeds the {} byte envelope bound",
        request.len(),
        MAX_REQUEST_LEN
    );
    request.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(request: &[u8]) -> (String, String) {
        let text = std::str::from_utf8(request).expect("request is not UTF-8");
        let (head, body) = text
            .split_once("\r\n\r\n")
            .expect("request has no header/body separator");
        (head.to_string(), body.to_string())
    }

    fn content_length(head: &str) -> usize {
        head.lines()
            .find_map(|line| line.strip_prefix("Content-Length: "))
            .expect("no Content-Length header")
            .parse()
            .expect("Content-Length is not a number")
    }

    #[test]
    fn body_carries_two_fractional_digits() {
        let (_, body) = split(&build_report("collector.example.net", 23.4));
        assert_eq!(body, "{\"temperature\": 23.40}");
    }

    #[test]
    fn content_length_equals_exact_body_length() {
        for reading in [0.0, 9.99, 23.4, 48.75, -3.5] {
            let (head, body) = split(&build_report("collector.example.net", reading));
            assert_eq!(content_length(&head), body.len());
        }
    }

    #[test]
    fn envelope_has_fixed_verb_path_and_headers() {
        let (head, _) = split(&build_report("collector.example.net", 21.0));
        let mut lines = head.lines();
        assert_eq!(lines.next(), Some("POST /temperature HTTP/1.1"));
        assert_eq!(lines.next(), Some("Host: collector.example.net"));
        assert_eq!(lines.next(), Some("User-Agent: thermo-reporter/0.1"));
        assert_eq!(lines.next(), Some("Content-Type: application/json"));
    }

    #[test]
    fn round_trip_recovers_reading_to_two_decimals() {
        let (_, body) = split(&build_report("collector.example.net", 20.45));
        let value: f32 = body
            .strip_prefix("{\"temperature\": ")
            .and_then(|rest| rest.strip_suffix('}'))
            .expect("body shape changed")
            .parse()
            .expect("body value is not a float");
        assert!((value - 20.45).abs() < 0.005);
    }
}
