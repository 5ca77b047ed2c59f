use snafu::Snafu;
use zova_model::FetchError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TimelineError {
    #[snafu(display("failed to load older messages for chat '{chat_id}' on `{stage}`: {source}"))]
    FetchOlderPage {
        stage: &'static str,
        chat_id: String,
        source: FetchError,
    },
}

pub type TimelineResult<T> = Result<T, TimelineError>;
