//! MJPEG byte stream splitter

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Cuts a concatenated MJPEG stream into individual JPEG frames.
///
/// Bytes before a start-of-image marker are dropped. Entropy-coded JPEG data
/// stuffs 0xFF bytes, so an end-of-image marker only appears at frame end.
#[derive(Debug, Default)]
pub struct MjpegSplitter {
    buf: Vec<u8>,
    /// Offset already searched for EOI without success
    scan_from: usize,
}

impl MjpegSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the stream
    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop the next complete frame, if one is buffered
    pub fn next_frame(&mut self) -> Option<Vec<u8>> {
        let start = find(&self.buf, &SOI)?;
        if start > 0 {
            self.buf.drain(..start);
            self.scan_from = 0;
        }

        let from = self.scan_from.max(SOI.len());
        match find(&self.buf[from..], &EOI) {
            Some(pos) => {
                let end = from + pos + EOI.len();
                let frame: Vec<u8> = self.buf.drain(..end).collect();
                self.scan_from = 0;
                Some(frame)
            }
            None => {
                // keep one byte back in case the marker straddles two reads
                self.scan_from = self.buf.len().saturating_sub(1).max(SOI.len());
                None
            }
        }
    }

    /// Bytes buffered but not yet emitted
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

fn find(haystack: &[u8], needle: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(body: &[u8]) -> Vec<u8> {
        let mut f = SOI.to_vec();
        f.extend_from_slice(body);
        f.extend_from_slice(&EOI);
        f
    }

    #[test]
    fn test_split_concatenated_frames() {
        let a = frame(&[1, 2, 3]);
        let b = frame(&[4, 0xFF, 0x00, 5]);
        let mut stream = a.clone();
        stream.extend_from_slice(&b);

        let mut splitter = MjpegSplitter::new();
        splitter.push(&stream);
        assert_eq!(splitter.next_frame(), Some(a));
        assert_eq!(splitter.next_frame(), Some(b));
        assert_eq!(splitter.next_frame(), None);
        assert_eq!(splitter.pending(), 0);
    }

    #[test]
    fn test_marker_split_across_reads() {
        let a = frame(&[9, 9, 9, 9]);
        let mut splitter = MjpegSplitter::new();

        // feed one byte at a time
        let mut out = Vec::new();
        for byte in &a {
            splitter.push(std::slice::from_ref(byte));
            if let Some(f) = splitter.next_frame() {
                out.push(f);
            }
        }
        assert_eq!(out, vec![a]);
    }

    #[test]
    fn test_leading_garbage_dropped() {
        let a = frame(&[7]);
        let mut stream = vec![0x00, 0x11, 0x22];
        stream.extend_from_slice(&a);

        let mut splitter = MjpegSplitter::new();
        splitter.push(&stream);
        assert_eq!(splitter.next_frame(), Some(a));
    }

    #[test]
    fn test_incomplete_frame_buffered() {
        let mut splitter = MjpegSplitter::new();
        splitter.push(&[0xFF, 0xD8, 1, 2]);
        assert_eq!(splitter.next_frame(), None);
        assert_eq!(splitter.pending(), 4);
        splitter.push(&[0xFF, 0xD9]);
        assert_eq!(splitter.next_frame(), Some(vec![0xFF, 0xD8, 1, 2, 0xFF, 0xD9]));
    }
}
