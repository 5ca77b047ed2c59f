use std::env;
use std::path::PathBuf;

use snafu::{OptionExt, ResultExt, Snafu};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use zova_model::{
    ChatId, ClientMessageId, ConversationId, LocalChatId, Message, MessageId, ModelError,
    RawMessage, Role, Timestamp,
};
use zova_timeline::testing::{InMemoryHistory, SimulatedViewport};
use zova_timeline::{
    FollowMode, LoadMoreOutcome, ScrollCoordinator, SelectedSource, SettingsError, SettingsStore,
    Timeline, TimelineContext, TimelineError, TimelineSettings, ViewportEvent,
    merge_initial_page_with_loaded_messages, prepend_older_messages, select_effective_messages,
};

const ROW_HEIGHT: f32 = 50.0;
const CLIENT_HEIGHT: f32 = 500.0;

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    MergeDirection,
    ReactiveOverride,
    SelectorPrecedence,
    SelectorFallback,
    NormalizeKeys,
    ScrollAnchor,
    LoadMoreFailure,
    DetachReattach,
    All,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "merge_direction" => Some(Self::MergeDirection),
            "reactive_override" => Some(Self::ReactiveOverride),
            "selector_precedence" => Some(Self::SelectorPrecedence),
            "selector_fallback" => Some(Self::SelectorFallback),
            "normalize_keys" => Some(Self::NormalizeKeys),
            "scroll_anchor" => Some(Self::ScrollAnchor),
            "load_more_failure" => Some(Self::LoadMoreFailure),
            "detach_reattach" => Some(Self::DetachReattach),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::MergeDirection => "merge_direction",
            Self::ReactiveOverride => "reactive_override",
            Self::SelectorPrecedence => "selector_precedence",
            Self::SelectorFallback => "selector_fallback",
            Self::NormalizeKeys => "normalize_keys",
            Self::ScrollAnchor => "scroll_anchor",
            Self::LoadMoreFailure => "load_more_failure",
            Self::DetachReattach => "detach_reattach",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("missing required --scenario argument"))]
    MissingScenario { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("settings could not be loaded: {source}"))]
    Settings {
        stage: &'static str,
        source: SettingsError,
    },
    #[snafu(display("timeline operation failed: {source}"))]
    Timeline {
        stage: &'static str,
        source: TimelineError,
    },
    #[snafu(display("message record rejected: {source}"))]
    Normalize {
        stage: &'static str,
        source: ModelError,
    },
    #[snafu(display("fixture record is malformed: {source}"))]
    Fixture {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(error) = run().await {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
}

async fn run() -> RunnerResult<()> {
    let args = parse_args(env::args().skip(1))?;
    println!("scenario={}", args.scenario.name());

    let context = match args.config_path {
        Some(path) => {
            let store = SettingsStore::open(path).context(SettingsSnafu {
                stage: "load-settings",
            })?;
            println!("config_path={}", store.config_path().display());
            TimelineContext::from_store(&store)
        }
        None => TimelineContext::default(),
    };
    let settings = context.settings();

    match args.scenario {
        Scenario::MergeDirection => run_merge_direction(),
        Scenario::ReactiveOverride => run_reactive_override(),
        Scenario::SelectorPrecedence => run_selector_precedence(),
        Scenario::SelectorFallback => run_selector_fallback(),
        Scenario::NormalizeKeys => run_normalize_keys(&settings),
        Scenario::ScrollAnchor => run_scroll_anchor(&settings).await,
        Scenario::LoadMoreFailure => run_load_more_failure(&settings).await,
        Scenario::DetachReattach => run_detach_reattach(&settings).await,
        Scenario::All => run_all(&settings).await,
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> RunnerResult<RunnerArgs> {
    let mut scenario = None;
    let mut config_path = None;
    let mut pending = args.into_iter();

    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--scenario" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-scenario-value",
                    arg: "--scenario",
                })?;

                let parsed = Scenario::parse(&value).context(UnknownScenarioSnafu {
                    stage: "parse-args-scenario",
                    raw: value,
                })?;
                scenario = Some(parsed);
            }
            "--config" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-config-value",
                    arg: "--config",
                })?;
                config_path = Some(PathBuf::from(value));
            }
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    Ok(RunnerArgs {
        scenario: scenario.context(MissingScenarioSnafu {
            stage: "parse-args-scenario-required",
        })?,
        config_path,
    })
}

async fn run_all(settings: &TimelineSettings) -> RunnerResult<()> {
    run_merge_direction()?;
    run_reactive_override()?;
    run_selector_precedence()?;
    run_selector_fallback()?;
    run_normalize_keys(settings)?;
    run_scroll_anchor(settings).await?;
    run_load_more_failure(settings).await?;
    run_detach_reattach(settings).await?;

    println!("all_passed=true");
    Ok(())
}

fn run_merge_direction() -> RunnerResult<()> {
    let chat_id = fixture_chat();
    let loaded = vec![
        fixture_message(chat_id, 3, "m3 (loaded)"),
        fixture_message(chat_id, 4, "m4"),
    ];
    let older = vec![
        fixture_message(chat_id, 1, "m1"),
        fixture_message(chat_id, 2, "m2"),
        fixture_message(chat_id, 3, "m3 (older page)"),
    ];

    let merged = prepend_older_messages(&loaded, &older);
    let contents = contents(&merged);
    println!("merged={}", contents.join(","));

    ensure(
        contents == ["m1", "m2", "m3 (loaded)", "m4"],
        "scenario-merge-direction",
        "merge_direction",
        format!("older page overrode loaded content: {contents:?}"),
    )?;

    println!("merge_direction=true");
    println!("runner_ok=true");
    Ok(())
}

fn run_reactive_override() -> RunnerResult<()> {
    let chat_id = fixture_chat();
    let loaded = (1..=5)
        .map(|n| fixture_message(chat_id, n, &format!("m{n}")))
        .collect::<Vec<_>>();
    let window = vec![
        fixture_message(chat_id, 4, "m4"),
        fixture_message(chat_id, 5, "m5 (edited)"),
    ];

    let merged = merge_initial_page_with_loaded_messages(&loaded, &window);
    let contents = contents(&merged);
    println!("merged={}", contents.join(","));

    ensure(
        contents == ["m1", "m2", "m3", "m4", "m5 (edited)"],
        "scenario-reactive-override",
        "reactive_override",
        format!("latest window did not win: {contents:?}"),
    )?;

    println!("reactive_override=true");
    println!("runner_ok=true");
    Ok(())
}

fn run_selector_precedence() -> RunnerResult<()> {
    let chat_id = fixture_chat();
    let paginated = vec![fixture_message(chat_id, 1, "hi")];

    let streaming = vec![
        fixture_message(chat_id, 1, "hi"),
        Message::assistant_streaming(ClientMessageId::new_v7(), chat_id, Timestamp(2_000)),
    ];
    let optimistic = select_effective_messages(&streaming, &paginated, &chat_id, true, false);
    println!("streaming_source={:?}", optimistic.source);

    let lagging = vec![
        fixture_message(chat_id, 1, "hi"),
        Message::persisted(MessageId::new_v7(), chat_id, Role::Assistant, "done", Timestamp(2_000)),
    ];
    let lag = select_effective_messages(&lagging, &paginated, &chat_id, true, false);
    println!("sync_lag_source={:?}", lag.source);

    let settled = select_effective_messages(&paginated, &paginated, &chat_id, true, false);
    println!("settled_source={:?}", settled.source);

    ensure(
        optimistic.source == SelectedSource::LiveOptimistic
            && lag.source == SelectedSource::LiveSyncLag
            && settled.source == SelectedSource::Paginated,
        "scenario-selector-precedence",
        "selector_precedence",
        "selector did not follow precedence".to_string(),
    )?;

    println!("selector_precedence=true");
    println!("runner_ok=true");
    Ok(())
}

fn run_selector_fallback() -> RunnerResult<()> {
    let local_chat = ChatId::Local(LocalChatId::new_v7());
    let local_live = vec![fixture_message(local_chat, 1, "draft chat")];
    let local = select_effective_messages(&local_live, &local_live, &local_chat, true, false);
    println!("local_chat_source={:?}", local.source);

    let chat_id = fixture_chat();
    let live = vec![fixture_message(chat_id, 1, "hi")];
    let loading = select_effective_messages(&live, &live, &chat_id, true, true);
    println!("loading_source={:?}", loading.source);

    ensure(
        local.source == SelectedSource::LiveFallback
            && loading.source == SelectedSource::LiveFallback,
        "scenario-selector-fallback",
        "selector_fallback",
        "paginated source was used while unavailable".to_string(),
    )?;

    println!("selector_fallback=true");
    println!("runner_ok=true");
    Ok(())
}

fn run_normalize_keys(settings: &TimelineSettings) -> RunnerResult<()> {
    let context = TimelineContext::new(settings.clone());
    let chat_id = fixture_chat();
    let record = serde_json::json!({
        "chatId": chat_id.to_string(),
        "role": "assistant",
        "content": "no id yet",
        "timestamp": 1_000,
    });

    let first = normalize_fixture(&context, record.clone())?;
    let second = normalize_fixture(&context, record)?;
    println!("synthesized_key={}", first.identity_key());

    ensure(
        first.identity_key() == second.identity_key() && !first.has_stable_key(),
        "scenario-normalize-keys",
        "normalize_keys",
        "keyless record changed identity between ticks".to_string(),
    )?;

    println!("normalize_keys=true");
    println!("runner_ok=true");
    Ok(())
}

async fn run_scroll_anchor(settings: &TimelineSettings) -> RunnerResult<()> {
    let chat_id = fixture_chat();
    let history = fixture_history(chat_id, 40);
    let mut timeline = fixture_timeline(settings, chat_id);

    let window = history.latest_window(20);
    let live = window.messages.clone();
    timeline.apply_latest_window(window);
    draw(&mut timeline, &live);

    // Park the reader two rows below the top.
    tokio::time::sleep(settings.scroll_throttle()).await;
    viewport(&mut timeline)?.user_scroll_to(2.0 * ROW_HEIGHT);
    timeline.handle_event(ViewportEvent::Scroll);
    let before = viewport(&mut timeline)?.screen_offset_of_row(2);

    let outcome = timeline
        .handle_load_more(&history)
        .await
        .context(TimelineSnafu {
            stage: "scenario-scroll-anchor-load-more",
        })?;
    let LoadMoreOutcome::Loaded(prepend) = outcome else {
        return ScenarioFailedSnafu {
            stage: "scenario-scroll-anchor-outcome",
            scenario: "scroll_anchor",
            reason: "load more was skipped".to_string(),
        }
        .fail();
    };

    let snapshot = timeline.render(&live);
    viewport(&mut timeline)?.insert_rows_at_top(prepend.inserted, ROW_HEIGHT);
    timeline.handle_event(ViewportEvent::AnimationFrame);
    let after = viewport(&mut timeline)?.screen_offset_of_row(2 + prepend.inserted);

    println!("inserted={}", prepend.inserted);
    println!("anchor_drift_px={}", (after - before).abs());
    ensure(
        (after - before).abs() <= 1.0 && snapshot.unseen_count == 0,
        "scenario-scroll-anchor",
        "scroll_anchor",
        format!("visible content moved from {before} to {after}"),
    )?;

    println!("scroll_anchor=true");
    println!("runner_ok=true");
    Ok(())
}

async fn run_load_more_failure(settings: &TimelineSettings) -> RunnerResult<()> {
    let chat_id = fixture_chat();
    let history = fixture_history(chat_id, 40);
    let mut timeline = fixture_timeline(settings, chat_id);
    timeline.apply_latest_window(history.latest_window(20));
    let before = timeline.pagination().paginated_messages().to_vec();

    history.fail_next_fetch();
    let failed = timeline.handle_load_more(&history).await;
    let unchanged = timeline.pagination().paginated_messages() == before.as_slice();
    let released = !timeline.pagination().is_loading_more();
    println!("failed={}", failed.is_err());

    let retried = timeline
        .handle_load_more(&history)
        .await
        .context(TimelineSnafu {
            stage: "scenario-load-more-failure-retry",
        })?;
    println!("retry={retried:?}");

    ensure(
        failed.is_err()
            && unchanged
            && released
            && matches!(retried, LoadMoreOutcome::Loaded(_)),
        "scenario-load-more-failure",
        "load_more_failure",
        "failed fetch changed the buffer or kept the load slot".to_string(),
    )?;

    println!("load_more_failure=true");
    println!("runner_ok=true");
    Ok(())
}

async fn run_detach_reattach(settings: &TimelineSettings) -> RunnerResult<()> {
    let context = TimelineContext::new(settings.clone());
    let mut coordinator = ScrollCoordinator::new(&context);
    coordinator.mount(SimulatedViewport::with_uniform_rows(20, ROW_HEIGHT, CLIENT_HEIGHT));
    coordinator.on_message_count_changed(20);
    coordinator.handle_event(ViewportEvent::AnimationFrame);

    tokio::time::sleep(settings.scroll_throttle()).await;
    if let Some(viewport) = coordinator.surface_mut() {
        viewport.user_scroll_to(0.0);
    }
    coordinator.handle_event(ViewportEvent::Scroll);
    let detached = coordinator.mode() == FollowMode::Detached;

    if let Some(viewport) = coordinator.surface_mut() {
        viewport.push_rows(2, ROW_HEIGHT);
    }
    coordinator.on_message_count_changed(22);
    let unseen = coordinator.state().unseen_count;

    // Come back to just outside the follow threshold, then start a reply.
    let resting = settings.stuck_threshold_px * 1.5;
    tokio::time::sleep(settings.scroll_throttle()).await;
    if let Some(viewport) = coordinator.surface_mut() {
        let bottom = viewport.scroll_height() - viewport.client_height();
        viewport.user_scroll_to(bottom - resting);
    }
    coordinator.handle_event(ViewportEvent::Scroll);
    coordinator.on_assistant_stream_started();
    let reattached = coordinator.mode() == FollowMode::Tracking;

    println!("detached={detached}");
    println!("unseen={unseen}");
    println!("reattached={reattached}");
    ensure(
        detached && unseen == 2 && reattached && coordinator.state().unseen_count == 0,
        "scenario-detach-reattach",
        "detach_reattach",
        "follow mode did not track the reader".to_string(),
    )?;

    println!("detach_reattach=true");
    println!("runner_ok=true");
    Ok(())
}

fn ensure(
    condition: bool,
    stage: &'static str,
    scenario: &'static str,
    reason: String,
) -> RunnerResult<()> {
    if condition {
        return Ok(());
    }

    ScenarioFailedSnafu {
        stage,
        scenario,
        reason,
    }
    .fail()
}

fn fixture_chat() -> ChatId {
    ChatId::Remote(ConversationId::new_v7())
}

fn fixture_message(chat_id: ChatId, n: u64, content: &str) -> Message {
    // Ids are derived from `n` so the same fixture row always has the same identity.
    let id = MessageId::new(uuid_for(n));
    Message::persisted(id, chat_id, Role::User, content, Timestamp(n as i64 * 1_000))
}

fn uuid_for(n: u64) -> Uuid {
    Uuid::from_u64_pair(0, n)
}

fn fixture_history(chat_id: ChatId, len: u64) -> InMemoryHistory {
    let messages = (1..=len)
        .map(|n| fixture_message(chat_id, n, &format!("m{n}")))
        .collect();
    InMemoryHistory::new(chat_id, messages)
}

fn fixture_timeline(settings: &TimelineSettings, chat_id: ChatId) -> Timeline<SimulatedViewport> {
    let mut timeline = Timeline::new(TimelineContext::new(settings.clone()), chat_id);
    timeline.mount(SimulatedViewport::new(CLIENT_HEIGHT));
    timeline
}

fn viewport(timeline: &mut Timeline<SimulatedViewport>) -> RunnerResult<&mut SimulatedViewport> {
    timeline
        .scroll_mut()
        .surface_mut()
        .context(ScenarioFailedSnafu {
            stage: "fixture-viewport",
            scenario: "fixture",
            reason: "viewport is not mounted".to_string(),
        })
}

fn draw(timeline: &mut Timeline<SimulatedViewport>, live: &[Message]) {
    let snapshot = timeline.render(live);
    if let Some(viewport) = timeline.scroll_mut().surface_mut() {
        viewport.set_rows(vec![ROW_HEIGHT; snapshot.messages.len()]);
    }
    timeline.handle_event(ViewportEvent::AnimationFrame);
}

fn normalize_fixture(context: &TimelineContext, record: serde_json::Value) -> RunnerResult<Message> {
    let raw: RawMessage = serde_json::from_value(record).context(FixtureSnafu {
        stage: "fixture-decode-record",
    })?;
    context.normalize(raw).context(NormalizeSnafu {
        stage: "fixture-normalize-record",
    })
}

fn contents(messages: &[Message]) -> Vec<&str> {
    messages
        .iter()
        .map(|message| message.content.as_str())
        .collect()
}
