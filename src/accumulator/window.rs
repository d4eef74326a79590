use crate::telemetry::ReadingBatch;

/// Model input of exactly `window_size` values for one channel.
///
/// Deliberately not `Clone`: a window is moved into the invoker and consumed once.
#[derive(Debug, PartialEq)]
pub struct Window {
    channel: String,
    values: Vec<f64>,
}

impl Window {
    /// Concatenates `parts` in order. Returns `None` unless the result is exactly
    /// `window_size` long.
    pub fn assemble(channel: &str, parts: &[&ReadingBatch], window_size: usize) -> Option<Self> {
        let values: Vec<f64> = parts.iter().copied().flat_map(ReadingBatch::values).collect();
        if values.len() != window_size {
            tracing::warn!(
                channel,
                got = values.len(),
                want = window_size,
                "refusing to assemble window of wrong length"
            );
            return None;
        }
        Some(Self {
            channel: channel.to_string(),
            values,
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::BatchToken;

    #[test]
    fn assemble_requires_exact_length() {
        let a = ReadingBatch::new("s1", BatchToken::new("t1"), &[1.0, 2.0]);
        let b = ReadingBatch::new("s1", BatchToken::new("t2"), &[3.0, 4.0]);

        let window = Window::assemble("s1", &[&a, &b], 4).expect("window");
        assert_eq!(window.values(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(window.channel(), "s1");

        assert!(Window::assemble("s1", &[&a], 4).is_none());
        assert!(Window::assemble("s1", &[&a, &b, &a], 4).is_none());
    }
}
