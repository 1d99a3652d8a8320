use std::env;
use std::sync::Arc;

use snafu::{OptionExt, Snafu};

use agrichat_session::{
    CONNECT_ERROR_REPLY, ChatSession, Role, ScriptedChat, ScriptedTransport, SessionSettings,
    TurnOutcome,
};
use agrichat_transport::UploadReceipt;

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    EmptySubmit,
    ExactlyOneTerminal,
    CoalesceOrder,
    SilentThenSpeak,
    DocIdSplit,
    DeleteReconcile,
    UploadRefreshConverge,
    ChatFailureFallback,
    All,
}

impl Scenario {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "empty_submit" => Some(Self::EmptySubmit),
            "exactly_one_terminal" => Some(Self::ExactlyOneTerminal),
            "coalesce_order" => Some(Self::CoalesceOrder),
            "silent_then_speak" => Some(Self::SilentThenSpeak),
            "doc_id_split" => Some(Self::DocIdSplit),
            "delete_reconcile" => Some(Self::DeleteReconcile),
            "upload_refresh_converge" => Some(Self::UploadRefreshConverge),
            "chat_failure_fallback" => Some(Self::ChatFailureFallback),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::EmptySubmit => "empty_submit",
            Self::ExactlyOneTerminal => "exactly_one_terminal",
            Self::CoalesceOrder => "coalesce_order",
            Self::SilentThenSpeak => "silent_then_speak",
            Self::DocIdSplit => "doc_id_split",
            Self::DeleteReconcile => "delete_reconcile",
            Self::UploadRefreshConverge => "upload_refresh_converge",
            Self::ChatFailureFallback => "chat_failure_fallback",
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
    tracing_subscriber::fmt::init();

    if let Err(error) = run().await {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
}

async fn run() -> RunnerResult<()> {
    let args = parse_args(env::args().skip(1))?;
    println!("scenario={}", args.scenario.name());

    match args.scenario {
        Scenario::EmptySubmit => run_empty_submit().await,
        Scenario::ExactlyOneTerminal => run_exactly_one_terminal().await,
        Scenario::CoalesceOrder => run_coalesce_order().await,
        Scenario::SilentThenSpeak => run_silent_then_speak().await,
        Scenario::DocIdSplit => run_doc_id_split().await,
        Scenario::DeleteReconcile => run_delete_reconcile().await,
        Scenario::UploadRefreshConverge => run_upload_refresh_converge().await,
        Scenario::ChatFailureFallback => run_chat_failure_fallback().await,
        Scenario::All => run_all().await,
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> RunnerResult<RunnerArgs> {
    let mut scenario = None;
    let mut pending = args.into_iter();

    // The parser is intentionally strict to keep scenario runs deterministic.
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
    })
}

async fn run_all() -> RunnerResult<()> {
    run_empty_submit().await?;
    run_exactly_one_terminal().await?;
    run_coalesce_order().await?;
    run_silent_then_speak().await?;
    run_doc_id_split().await?;
    run_delete_reconcile().await?;
    run_upload_refresh_converge().await?;
    run_chat_failure_fallback().await?;

    println!("all_passed=true");
    Ok(())
}

fn fresh_session(transport: ScriptedTransport) -> ChatSession {
    ChatSession::new(Arc::new(transport), SessionSettings::default())
}

fn scenario_failure(
    scenario: &'static str,
    stage: &'static str,
    reason: impl Into<String>,
) -> RunnerError {
    RunnerError::ScenarioFailed {
        stage,
        scenario,
        reason: reason.into(),
    }
}

async fn run_empty_submit() -> RunnerResult<()> {
    let mut session = fresh_session(ScriptedTransport::new());

    let blank = session.submit("").await;
    let spaces = session.submit("   ").await;
    let transcript_untouched = session.messages().is_empty();

    println!("blank_ignored={}", blank == TurnOutcome::Ignored);
    println!("spaces_ignored={}", spaces == TurnOutcome::Ignored);
    println!("transcript_untouched={transcript_untouched}");

    if blank != TurnOutcome::Ignored || spaces != TurnOutcome::Ignored || !transcript_untouched {
        return Err(scenario_failure(
            "empty_submit",
            "scenario-empty-submit-assert",
            "whitespace-only submissions must leave the transcript unchanged",
        ));
    }

    println!("runner_ok=true");
    Ok(())
}

async fn run_exactly_one_terminal() -> RunnerResult<()> {
    let transport = ScriptedTransport::new();
    transport.push_chat(ScriptedChat::Fragments(vec!["an answer".to_string()]));
    transport.push_chat(ScriptedChat::FailOpen("network down".to_string()));
    transport.push_chat(ScriptedChat::FailMidStream {
        fragments: vec!["partial".to_string()],
        message: "backend crashed".to_string(),
    });
    let mut session = fresh_session(transport);

    for (index, query) in ["works", "fails to connect", "fails mid-stream"]
        .iter()
        .enumerate()
    {
        let before = session.messages().len();
        let _ = session.submit(query).await;
        let after = session.messages().len();

        if after != before + 2 {
            return Err(scenario_failure(
                "exactly_one_terminal",
                "scenario-exactly-one-terminal-growth",
                format!("submission {index} grew the transcript by {}", after - before),
            ));
        }
    }

    let roles_alternate = session
        .messages()
        .iter()
        .enumerate()
        .all(|(index, message)| {
            let expected = if index % 2 == 0 {
                Role::User
            } else {
                Role::Assistant
            };
            message.role == expected
        });

    println!("transcript_len={}", session.messages().len());
    println!("roles_alternate={roles_alternate}");

    if !roles_alternate {
        return Err(scenario_failure(
            "exactly_one_terminal",
            "scenario-exactly-one-terminal-roles",
            "transcript must alternate user/assistant per submission",
        ));
    }

    println!("runner_ok=true");
    Ok(())
}

async fn run_coalesce_order() -> RunnerResult<()> {
    let transport = ScriptedTransport::new();
    transport.push_chat(ScriptedChat::Fragments(vec![
        "Hello".to_string(),
        " world".to_string(),
    ]));
    let mut session = fresh_session(transport);

    let outcome = session.submit("greeting please").await;
    let assistant_count = session
        .messages()
        .iter()
        .filter(|message| message.role == Role::Assistant)
        .count();
    let content = session
        .messages()
        .last()
        .map(|message| message.content.clone())
        .unwrap_or_default();

    println!("outcome_answered={}", outcome == TurnOutcome::Answered);
    println!("assistant_count={assistant_count}");
    println!("content={content}");

    if assistant_count != 1 || content != "Hello world" {
        return Err(scenario_failure(
            "coalesce_order",
            "scenario-coalesce-order-assert",
            "fragments must coalesce into a single ordered reply",
        ));
    }

    println!("runner_ok=true");
    Ok(())
}

async fn run_silent_then_speak() -> RunnerResult<()> {
    let transport = ScriptedTransport::new();
    transport.push_chat(ScriptedChat::Fragments(vec![
        String::new(),
        String::new(),
        "Answer".to_string(),
    ]));
    let mut session = fresh_session(transport);

    let outcome = session.submit("still there?").await;
    let assistant_count = session
        .messages()
        .iter()
        .filter(|message| message.role == Role::Assistant)
        .count();
    let thinking_cleared = !session.is_thinking();

    println!("outcome_answered={}", outcome == TurnOutcome::Answered);
    println!("assistant_count={assistant_count}");
    println!("thinking_cleared={thinking_cleared}");

    if assistant_count != 1 || !thinking_cleared {
        return Err(scenario_failure(
            "silent_then_speak",
            "scenario-silent-then-speak-assert",
            "empty fragments must defer the reply without duplicating it",
        ));
    }

    println!("runner_ok=true");
    Ok(())
}

async fn run_doc_id_split() -> RunnerResult<()> {
    let transport = ScriptedTransport::new();
    transport.push_listing(Ok(vec!["abc123_report.pdf".to_string()]));
    let mut session = fresh_session(transport);

    session.refresh_documents().await;
    let split_ok = session.documents().len() == 1
        && session.documents()[0].internal_id == "abc123"
        && session.documents()[0].filename == "report.pdf";

    println!("split_ok={split_ok}");

    if !split_ok {
        return Err(scenario_failure(
            "doc_id_split",
            "scenario-doc-id-split-assert",
            "raw listing entry must split into id and display name",
        ));
    }

    println!("runner_ok=true");
    Ok(())
}

async fn run_delete_reconcile() -> RunnerResult<()> {
    let transport = ScriptedTransport::new();
    transport.push_listing(Ok(vec![
        "a1_field_notes.pdf".to_string(),
        "b2_field_notes.pdf".to_string(),
    ]));
    transport.push_delete(Ok(()));
    let mut session = fresh_session(transport);

    session.refresh_documents().await;
    session
        .delete_document("a1")
        .await
        .map_err(|error| {
            scenario_failure(
                "delete_reconcile",
                "scenario-delete-reconcile-delete",
                error.to_string(),
            )
        })?;

    let survivor_ok =
        session.documents().len() == 1 && session.documents()[0].internal_id == "b2";

    println!("survivor_ok={survivor_ok}");

    if !survivor_ok {
        return Err(scenario_failure(
            "delete_reconcile",
            "scenario-delete-reconcile-assert",
            "delete must remove exactly the matching id despite name collisions",
        ));
    }

    println!("runner_ok=true");
    Ok(())
}

async fn run_upload_refresh_converge() -> RunnerResult<()> {
    let transport = ScriptedTransport::new();
    transport.push_upload(Ok(UploadReceipt {
        internal_id: "c3".to_string(),
        filename: "irrigation.pdf".to_string(),
        indexing_summary: Some("9 chunks indexed".to_string()),
    }));
    transport.push_listing(Ok(vec!["c3_irrigation.pdf".to_string()]));
    let mut session = fresh_session(transport);

    session
        .upload_document(b"%PDF".to_vec(), "irrigation.pdf")
        .await
        .map_err(|error| {
            scenario_failure(
                "upload_refresh_converge",
                "scenario-upload-refresh-upload",
                error.to_string(),
            )
        })?;

    let optimistic: Vec<String> = session
        .documents()
        .iter()
        .map(|document| document.internal_id.clone())
        .collect();

    session.refresh_documents().await;

    let refreshed: Vec<String> = session
        .documents()
        .iter()
        .map(|document| document.internal_id.clone())
        .collect();
    let converged = optimistic == refreshed;

    println!("optimistic_ids={}", optimistic.join(","));
    println!("refreshed_ids={}", refreshed.join(","));
    println!("converged={converged}");

    if !converged {
        return Err(scenario_failure(
            "upload_refresh_converge",
            "scenario-upload-refresh-assert",
            "refresh after optimistic append must agree on the id set",
        ));
    }

    println!("runner_ok=true");
    Ok(())
}

async fn run_chat_failure_fallback() -> RunnerResult<()> {
    let transport = ScriptedTransport::new();
    transport.push_chat(ScriptedChat::FailOpen("unreachable".to_string()));
    let mut session = fresh_session(transport);

    let outcome = session.submit("anyone home?").await;
    let fallback_recorded = session
        .messages()
        .last()
        .map(|message| message.content == CONNECT_ERROR_REPLY)
        .unwrap_or(false);
    let thinking_cleared = !session.is_thinking();

    println!("outcome_failed={}", outcome == TurnOutcome::Failed);
    println!("fallback_recorded={fallback_recorded}");
    println!("thinking_cleared={thinking_cleared}");

    if outcome != TurnOutcome::Failed || !fallback_recorded || !thinking_cleared {
        return Err(scenario_failure(
            "chat_failure_fallback",
            "scenario-chat-failure-assert",
            "transport failure must degrade to the designated fallback reply",
        ));
    }

    println!("runner_ok=true");
    Ok(())
}
