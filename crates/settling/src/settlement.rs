#![forbid(unsafe_code)]

//! The settlement data model: the disposition of an eventually-available
//! value.
//!
//! A [`Settlement`] is an explicit tagged union — exactly one of pending,
//! ready, or failed at any time. Classification is always by variant match,
//! never by inspecting the shape of the payload.

/// The current disposition of an eventual value.
///
/// Transitions are `Pending` → terminal in the common case. Re-settling an
/// already-settled cell is possible only through the explicit override
/// channel ([`Eventual::set`](crate::Eventual::set) /
/// [`Eventual::update`](crate::Eventual::update)); nothing in this crate
/// silently reverts a terminal settlement to `Pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement<T, E> {
    /// No value yet.
    Pending,
    /// Success; the final value is present.
    Ready(T),
    /// Failure; the terminal value is an error.
    Failed(E),
}

impl<T, E> Settlement<T, E> {
    /// Whether no value has arrived yet.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Whether this settlement is terminal (ready or failed).
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !self.is_pending()
    }

    /// Whether this settlement carries a success value.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Whether this settlement carries an error.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// View a terminal settlement as a `Result`; `None` while pending.
    pub fn as_result(&self) -> Option<Result<&T, &E>> {
        match self {
            Self::Pending => None,
            Self::Ready(value) => Some(Ok(value)),
            Self::Failed(error) => Some(Err(error)),
        }
    }

    /// Consume the settlement, yielding the success value if present.
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// Consume the settlement, yielding the error if present.
    pub fn failed(self) -> Option<E> {
        match self {
            Self::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Discriminant name, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready(_) => "ready",
            Self::Failed(_) => "failed",
        }
    }
}

impl<T, E> From<Result<T, E>> for Settlement<T, E> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => Self::Ready(value),
            Err(error) => Self::Failed(error),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    type S = Settlement<i32, String>;

    #[test]
    fn exactly_one_variant() {
        let pending: S = Settlement::Pending;
        assert!(pending.is_pending());
        assert!(!pending.is_settled());
        assert!(!pending.is_ready());
        assert!(!pending.is_failed());

        let ready: S = Settlement::Ready(7);
        assert!(ready.is_settled());
        assert!(ready.is_ready());
        assert!(!ready.is_failed());

        let failed: S = Settlement::Failed("boom".into());
        assert!(failed.is_settled());
        assert!(failed.is_failed());
        assert!(!failed.is_ready());
    }

    #[test]
    fn as_result_views() {
        let pending: S = Settlement::Pending;
        assert_eq!(pending.as_result(), None);

        let ready: S = Settlement::Ready(1);
        assert_eq!(ready.as_result(), Some(Ok(&1)));

        let failed: S = Settlement::Failed("e".into());
        assert_eq!(failed.as_result(), Some(Err(&"e".to_string())));
    }

    #[test]
    fn from_result() {
        let ok: S = Ok(3).into();
        assert_eq!(ok, Settlement::Ready(3));

        let err: S = Err("nope".to_string()).into();
        assert_eq!(err, Settlement::Failed("nope".into()));
    }

    #[test]
    fn consuming_accessors() {
        let ready: S = Settlement::Ready(9);
        assert_eq!(ready.ready(), Some(9));

        let failed: S = Settlement::Failed("x".into());
        assert_eq!(failed.failed(), Some("x".into()));

        let pending: S = Settlement::Pending;
        assert_eq!(pending.ready(), None);
    }

    #[test]
    fn kind_names() {
        assert_eq!(S::Pending.kind(), "pending");
        assert_eq!(S::Ready(0).kind(), "ready");
        assert_eq!(S::Failed(String::new()).kind(), "failed");
    }
}
