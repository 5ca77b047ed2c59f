use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ModelError {
    #[snafu(display("id '{raw}' is invalid for {id_type}"))]
    InvalidId {
        stage: &'static str,
        id_type: &'static str,
        raw: String,
        source: uuid::Error,
    },
    #[snafu(display("chat id '{raw}' is invalid on `{stage}`"))]
    InvalidChatId {
        stage: &'static str,
        raw: String,
        source: Box<ModelError>,
    },
}

pub type ModelResult<T> = Result<T, ModelError>;

/// Failure reported by an older-page fetch collaborator.
///
/// The timeline never retries; callers decide retry and backoff policy.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum FetchError {
    #[snafu(display("older page fetch failed on `{stage}`: {message}"))]
    Transport {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("chat '{chat_id}' is not available for paging"))]
    ChatUnavailable {
        stage: &'static str,
        chat_id: String,
    },
    #[snafu(display("cursor '{cursor}' was rejected on `{stage}`"))]
    InvalidCursor {
        stage: &'static str,
        cursor: String,
    },
}

pub type FetchResult<T> = Result<T, FetchError>;
