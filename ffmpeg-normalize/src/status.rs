//! Tagged outcome of a non-blocking FFmpeg call.
//!
//! libavcodec and libavfilter report "nothing this time" (`EAGAIN`) and
//! "drained" (`AVERROR_EOF`) through the same negative return codes as real
//! failures. Every call site in this crate runs its raw result through
//! [`classify`] so the two non-fatal cases never reach an `Err`.

use ffmpeg_next::util::error::EAGAIN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvStatus<T> {
    Ready(T),
    /// No work completed this call; call again later.
    Again,
    /// No more data until the component is reset.
    Eof,
}

impl<T> AvStatus<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, AvStatus::Ready(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            AvStatus::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> AvStatus<U> {
        match self {
            AvStatus::Ready(value) => AvStatus::Ready(f(value)),
            AvStatus::Again => AvStatus::Again,
            AvStatus::Eof => AvStatus::Eof,
        }
    }
}

/// Splits an FFmpeg result into `Ready | Again | Eof`, leaving only real
/// failures in the error position.
pub fn classify<T>(result: Result<T, ffmpeg_next::Error>) -> Result<AvStatus<T>, ffmpeg_next::Error> {
    match result {
        Ok(value) => Ok(AvStatus::Ready(value)),
        Err(ffmpeg_next::Error::Eof) => Ok(AvStatus::Eof),
        Err(ffmpeg_next::Error::Other { errno }) if errno == EAGAIN => Ok(AvStatus::Again),
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_non_fatal_codes() {
        assert_eq!(classify(Ok(7)).unwrap(), AvStatus::Ready(7));
        assert_eq!(
            classify::<()>(Err(ffmpeg_next::Error::Eof)).unwrap(),
            AvStatus::Eof
        );
        assert_eq!(
            classify::<()>(Err(ffmpeg_next::Error::Other { errno: EAGAIN })).unwrap(),
            AvStatus::Again
        );
    }

    #[test]
    fn test_classify_keeps_real_errors() {
        let result = classify::<()>(Err(ffmpeg_next::Error::InvalidData));
        assert!(matches!(result, Err(ffmpeg_next::Error::InvalidData)));
    }

    #[test]
    fn test_map_and_ready() {
        assert_eq!(AvStatus::Ready(2).map(|v| v * 10), AvStatus::Ready(20));
        assert_eq!(AvStatus::<i32>::Again.map(|v| v * 10), AvStatus::Again);
        assert_eq!(AvStatus::Ready("x").ready(), Some("x"));
        assert!(AvStatus::<()>::Eof.ready().is_none());
        assert!(!AvStatus::<()>::Again.is_ready());
    }
}
