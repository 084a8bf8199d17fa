//! # Command Channel
//!
//! Request queue on top of the shell transport. The channel is the sole
//! writer to the shell: commands are serialized FIFO, each in-flight command
//! is correlated with the response lines that follow its echo, and every
//! request resolves exactly once — success, rejection, or timeout.
//!
//! The channel runs as an actor task owning the transport and the queue;
//! callers hold a cloneable [`CommandHandle`] and get a single tagged
//! [`CommandOutcome`] back per request. A request marked `unique` that
//! collides with an in-flight identical command text does not produce a
//! second transport write — the new caller is coalesced onto the pending
//! request and receives the same outcome.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::transport::ShellTransport;

/// Default per-command response window
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(2000);

/// Prompt the shell prints when it is ready for the next command
pub const SHELL_PROMPT: &str = "shell:~$";

/// Fixed rejection reason used when no shell is attached
pub const NO_CONNECTION: &str = "No shell connection";

/// Capacity of the actor mailbox and the outbound event stream
const CHANNEL_CAPACITY: usize = 64;

/// Tagged result of one command round-trip
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The device answered; payload is the response text between echo and prompt
    Success(String),

    /// The device answered with an error, or the command could not be sent
    Rejected(String),

    /// No matching response arrived within the timeout window
    TimedOut,
}

impl CommandOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// How the echo of an in-flight command is recognized
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseMatcher {
    /// The shell echoes the command text verbatim
    Literal(String),

    /// Matches any `<base> get ...` / `<base> set ...` echo, tolerating the
    /// unit suffix some firmware builds append to set echoes
    GetSet { base: String },
}

impl ResponseMatcher {
    /// Matcher for a plain command round-trip
    #[must_use]
    pub fn literal(command: &str) -> Self {
        Self::Literal(command.to_string())
    }

    /// Matcher for the `get`/`set` forms of a command family
    #[must_use]
    pub fn get_set(base: &str) -> Self {
        Self::GetSet {
            base: base.to_string(),
        }
    }

    /// Test a shell line (prompt prefix already stripped) against the matcher
    #[must_use]
    pub fn matches(&self, line: &str) -> bool {
        let line = line.trim();
        match self {
            Self::Literal(command) => line == command,
            Self::GetSet { base } => match line.strip_prefix(base.as_str()) {
                Some(rest) => {
                    let mut tokens = rest.split_whitespace();
                    matches!(tokens.next(), Some("get") | Some("set"))
                }
                None => false,
            },
        }
    }
}

/// Events the channel forwards to the device session, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    /// A bracketed log line (undecoded; the session owns the decoder)
    Log(String),

    /// A non-log line that no in-flight request claimed
    Unsolicited(String),

    /// Audit mirror: a request resolved (successfully or not)
    CommandResolved {
        command: String,
        response: String,
        success: bool,
    },

    /// The transport write failed; the shell link is in doubt
    IoError(String),

    /// The inbound line stream closed; the shell is gone
    LinkClosed,
}

/// Channel tuning knobs
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub timeout: Duration,
    pub prompt: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
            prompt: SHELL_PROMPT.to_string(),
        }
    }
}

struct Request {
    command: String,
    matcher: ResponseMatcher,
    timeout: Duration,
    responders: Vec<oneshot::Sender<CommandOutcome>>,
}

struct ActiveRequest {
    request: Request,
    deadline: Instant,
    echo_seen: bool,
    response_lines: Vec<String>,
}

enum ChannelMsg {
    Request {
        command: String,
        matcher: ResponseMatcher,
        timeout: Option<Duration>,
        unique: bool,
        responder: oneshot::Sender<CommandOutcome>,
    },
    Pause,
    Resume,
}

/// Cloneable handle to the command channel actor
#[derive(Clone)]
pub struct CommandHandle {
    tx: mpsc::Sender<ChannelMsg>,
}

impl CommandHandle {
    /// Send one command and await its tagged outcome.
    ///
    /// `timeout` of `None` uses the channel default. With `unique` set, an
    /// identical in-flight command text coalesces this call onto the pending
    /// request instead of writing a second line.
    pub async fn request(
        &self,
        command: &str,
        matcher: ResponseMatcher,
        timeout: Option<Duration>,
        unique: bool,
    ) -> CommandOutcome {
        let (responder, outcome_rx) = oneshot::channel();
        let msg = ChannelMsg::Request {
            command: command.to_string(),
            matcher,
            timeout,
            unique,
            responder,
        };

        if self.tx.send(msg).await.is_err() {
            return CommandOutcome::Rejected(NO_CONNECTION.to_string());
        }

        outcome_rx
            .await
            .unwrap_or_else(|_| CommandOutcome::Rejected(NO_CONNECTION.to_string()))
    }

    /// Stop sending queued commands while the shell reports busy
    pub async fn pause(&self) {
        let _ = self.tx.send(ChannelMsg::Pause).await;
    }

    /// Resume sending after [`CommandHandle::pause`]
    pub async fn resume(&self) {
        let _ = self.tx.send(ChannelMsg::Resume).await;
    }
}

/// Command channel constructor
pub struct CommandChannel;

impl CommandChannel {
    /// Spawn the channel actor over a transport and its inbound line stream.
    ///
    /// Returns the request handle and the ordered [`ShellEvent`] stream for
    /// the device session.
    pub fn spawn<T>(
        transport: T,
        line_rx: mpsc::Receiver<String>,
        config: ChannelConfig,
    ) -> (CommandHandle, mpsc::Receiver<ShellEvent>)
    where
        T: ShellTransport + 'static,
    {
        let (msg_tx, msg_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);

        tokio::spawn(
            Actor {
                transport,
                config,
                queue: VecDeque::new(),
                active: None,
                paused: false,
                event_tx,
            }
            .run(msg_rx, line_rx),
        );

        (CommandHandle { tx: msg_tx }, event_rx)
    }
}

struct Actor<T> {
    transport: T,
    config: ChannelConfig,
    queue: VecDeque<Request>,
    active: Option<ActiveRequest>,
    paused: bool,
    event_tx: mpsc::Sender<ShellEvent>,
}

impl<T: ShellTransport> Actor<T> {
    async fn run(
        mut self,
        mut msg_rx: mpsc::Receiver<ChannelMsg>,
        mut line_rx: mpsc::Receiver<String>,
    ) {
        loop {
            let deadline = self
                .active
                .as_ref()
                .map_or_else(|| Instant::now() + Duration::from_secs(3600), |a| a.deadline);

            tokio::select! {
                msg = msg_rx.recv() => match msg {
                    Some(msg) => self.handle_msg(msg),
                    // every handle dropped: resolve what is left and stop
                    None => break,
                },
                line = line_rx.recv() => match line {
                    Some(line) => self.handle_line(line).await,
                    None => {
                        self.fail_all(NO_CONNECTION);
                        let _ = self.event_tx.send(ShellEvent::LinkClosed).await;
                        break;
                    }
                },
                () = tokio::time::sleep_until(deadline), if self.active.is_some() => {
                    self.resolve_active(CommandOutcome::TimedOut).await;
                }
            }

            self.pump().await;
        }

        self.fail_all(NO_CONNECTION);
    }

    fn handle_msg(&mut self, msg: ChannelMsg) {
        match msg {
            ChannelMsg::Request {
                command,
                matcher,
                timeout,
                unique,
                responder,
            } => {
                if unique {
                    if let Some(active) = self.active.as_mut() {
                        if active.request.command == command {
                            active.request.responders.push(responder);
                            debug!("Coalesced unique command: {}", command);
                            return;
                        }
                    }
                    if let Some(queued) =
                        self.queue.iter_mut().find(|r| r.command == command)
                    {
                        queued.responders.push(responder);
                        debug!("Coalesced unique command: {}", command);
                        return;
                    }
                }

                self.queue.push_back(Request {
                    command,
                    matcher,
                    timeout: timeout.unwrap_or(self.config.timeout),
                    responders: vec![responder],
                });
            }
            ChannelMsg::Pause => self.paused = true,
            ChannelMsg::Resume => self.paused = false,
        }
    }

    /// Send the next queued command when the line is idle
    async fn pump(&mut self) {
        while self.active.is_none() && !self.paused {
            let Some(request) = self.queue.pop_front() else {
                return;
            };

            match self.transport.send_line(&request.command).await {
                Ok(()) => {
                    self.active = Some(ActiveRequest {
                        deadline: Instant::now() + request.timeout,
                        request,
                        echo_seen: false,
                        response_lines: Vec::new(),
                    });
                }
                Err(e) => {
                    warn!("Shell write failed for {:?}: {}", request.command, e);
                    let reason = format!("shell write failed: {e}");
                    let _ = self.event_tx.send(ShellEvent::IoError(reason.clone())).await;
                    self.active = Some(ActiveRequest {
                        deadline: Instant::now(),
                        request,
                        echo_seen: false,
                        response_lines: Vec::new(),
                    });
                    self.resolve_active(CommandOutcome::Rejected(reason)).await;
                }
            }
        }
    }

    async fn handle_line(&mut self, line: String) {
        // asynchronous log traffic is interleaved with responses at will
        if line.starts_with('[') {
            let _ = self.event_tx.send(ShellEvent::Log(line)).await;
            return;
        }

        let Some(active) = self.active.as_mut() else {
            let _ = self.event_tx.send(ShellEvent::Unsolicited(line)).await;
            return;
        };

        let stripped = strip_prompt(&line, &self.config.prompt);

        if !active.echo_seen {
            if active.request.matcher.matches(stripped) {
                active.echo_seen = true;
            } else if !stripped.trim().is_empty() {
                // stale output from before our command went out
                let _ = self.event_tx.send(ShellEvent::Unsolicited(line)).await;
            }
            return;
        }

        if stripped.trim().is_empty() {
            // bare prompt terminates the response
            let response = active.response_lines.join("\n");
            let outcome = if is_error_response(&response) {
                CommandOutcome::Rejected(response)
            } else {
                CommandOutcome::Success(response)
            };
            self.resolve_active(outcome).await;
            return;
        }

        active.response_lines.push(stripped.trim_end().to_string());
    }

    /// Resolve the in-flight request, notify all coalesced waiters, and
    /// mirror the round-trip into the audit stream.
    async fn resolve_active(&mut self, outcome: CommandOutcome) {
        let Some(active) = self.active.take() else {
            return;
        };

        let (response, success) = match &outcome {
            CommandOutcome::Success(response) => (response.clone(), true),
            CommandOutcome::Rejected(reason) => (reason.clone(), false),
            CommandOutcome::TimedOut => ("timed out".to_string(), false),
        };

        let _ = self
            .event_tx
            .send(ShellEvent::CommandResolved {
                command: active.request.command.clone(),
                response,
                success,
            })
            .await;

        for responder in active.request.responders {
            let _ = responder.send(outcome.clone());
        }
    }

    fn fail_all(&mut self, reason: &str) {
        if let Some(active) = self.active.take() {
            for responder in active.request.responders {
                let _ = responder.send(CommandOutcome::Rejected(reason.to_string()));
            }
        }
        for request in self.queue.drain(..) {
            for responder in request.responders {
                let _ = responder.send(CommandOutcome::Rejected(reason.to_string()));
            }
        }
    }
}

/// Remove a leading shell prompt from a line
fn strip_prompt<'a>(line: &'a str, prompt: &str) -> &'a str {
    line.trim_start()
        .strip_prefix(prompt)
        .map_or(line, str::trim_start)
}

/// The shell reports command failures as `error:` lines
fn is_error_response(response: &str) -> bool {
    let trimmed = response.trim_start();
    trimmed
        .get(..5)
        .is_some_and(|head| head.eq_ignore_ascii_case("error"))
        || trimmed.starts_with("Unknown command")
        || trimmed.contains("IO error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::transport::mocks::MockShellTransport;

    fn spawn_channel(
        timeout: Duration,
    ) -> (
        MockShellTransport,
        mpsc::Sender<String>,
        CommandHandle,
        mpsc::Receiver<ShellEvent>,
    ) {
        let (mock, line_tx, line_rx) = MockShellTransport::with_lines();
        let config = ChannelConfig {
            timeout,
            ..ChannelConfig::default()
        };
        let (handle, event_rx) = CommandChannel::spawn(mock.clone(), line_rx, config);
        (mock, line_tx, handle, event_rx)
    }

    /// Feed the echo, response lines, and the terminating prompt
    async fn feed_response(line_tx: &mpsc::Sender<String>, echo: &str, lines: &[&str]) {
        line_tx.send(echo.to_string()).await.unwrap();
        for line in lines {
            line_tx.send((*line).to_string()).await.unwrap();
        }
        line_tx.send(SHELL_PROMPT.to_string()).await.unwrap();
    }

    #[tokio::test]
    async fn test_success_round_trip() {
        let (mock, line_tx, handle, _events) = spawn_channel(Duration::from_secs(1));

        let request = tokio::spawn({
            let handle = handle.clone();
            async move {
                handle
                    .request(
                        "npmx charger charging_current get",
                        ResponseMatcher::get_set("npmx charger charging_current"),
                        None,
                        true,
                    )
                    .await
            }
        });

        // wait for the write, then script the device's reply
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(mock.sent(), vec!["npmx charger charging_current get"]);
        feed_response(
            &line_tx,
            "npmx charger charging_current get",
            &["Value: 800 mA"],
        )
        .await;

        assert_eq!(
            request.await.unwrap(),
            CommandOutcome::Success("Value: 800 mA".to_string())
        );
    }

    #[tokio::test]
    async fn test_error_response_rejects() {
        let (_mock, line_tx, handle, _events) = spawn_channel(Duration::from_secs(1));

        let request = tokio::spawn({
            let handle = handle.clone();
            async move {
                handle
                    .request("fuel_gauge set 2", ResponseMatcher::literal("fuel_gauge set 2"), None, false)
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        feed_response(&line_tx, "fuel_gauge set 2", &["error: invalid value"]).await;

        assert_eq!(
            request.await.unwrap(),
            CommandOutcome::Rejected("error: invalid value".to_string())
        );
    }

    #[tokio::test]
    async fn test_timeout_when_no_response() {
        let (_mock, _line_tx, handle, _events) = spawn_channel(Duration::from_millis(30));

        let outcome = handle
            .request("kernel uptime", ResponseMatcher::literal("kernel uptime"), None, false)
            .await;

        assert_eq!(outcome, CommandOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_unique_commands_coalesce_to_one_write() {
        let (mock, line_tx, handle, _events) = spawn_channel(Duration::from_secs(1));

        let first = tokio::spawn({
            let handle = handle.clone();
            async move {
                handle
                    .request("fuel_gauge get", ResponseMatcher::literal("fuel_gauge get"), None, true)
                    .await
            }
        });
        let second = tokio::spawn({
            let handle = handle.clone();
            async move {
                handle
                    .request("fuel_gauge get", ResponseMatcher::literal("fuel_gauge get"), None, true)
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            mock.sent().len(),
            1,
            "identical unique commands must not produce two transport writes"
        );

        feed_response(&line_tx, "fuel_gauge get", &["Value: 1"]).await;

        // both coalesced callers receive the same single outcome
        assert_eq!(first.await.unwrap(), CommandOutcome::Success("Value: 1".to_string()));
        assert_eq!(second.await.unwrap(), CommandOutcome::Success("Value: 1".to_string()));
    }

    #[tokio::test]
    async fn test_fifo_ordering_one_in_flight() {
        let (mock, line_tx, handle, _events) = spawn_channel(Duration::from_secs(1));

        let first = tokio::spawn({
            let handle = handle.clone();
            async move {
                handle
                    .request("npmx pof status get", ResponseMatcher::get_set("npmx pof status"), None, true)
                    .await
            }
        });
        let second = tokio::spawn({
            let handle = handle.clone();
            async move {
                handle
                    .request("npmx pof polarity get", ResponseMatcher::get_set("npmx pof polarity"), None, true)
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(mock.sent(), vec!["npmx pof status get"], "second command waits its turn");

        feed_response(&line_tx, "npmx pof status get", &["Value: 1"]).await;
        assert!(first.await.unwrap().is_success());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(mock.sent().len(), 2);

        feed_response(&line_tx, "npmx pof polarity get", &["Value: 0"]).await;
        assert!(second.await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_log_lines_pass_through_mid_command() {
        let (_mock, line_tx, handle, mut events) = spawn_channel(Duration::from_secs(1));

        let request = tokio::spawn({
            let handle = handle.clone();
            async move {
                handle
                    .request("fuel_gauge get", ResponseMatcher::literal("fuel_gauge get"), None, true)
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        line_tx.send("fuel_gauge get".to_string()).await.unwrap();
        line_tx
            .send("[00:00:01.000,000] <inf> module_pmic_adc: vbat=4.2".to_string())
            .await
            .unwrap();
        line_tx.send("Value: 0".to_string()).await.unwrap();
        line_tx.send(SHELL_PROMPT.to_string()).await.unwrap();

        assert_eq!(
            request.await.unwrap(),
            CommandOutcome::Success("Value: 0".to_string())
        );

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            ShellEvent::Log("[00:00:01.000,000] <inf> module_pmic_adc: vbat=4.2".to_string())
        );
    }

    #[tokio::test]
    async fn test_resolution_is_mirrored_for_audit() {
        let (_mock, line_tx, handle, mut events) = spawn_channel(Duration::from_secs(1));

        let request = tokio::spawn({
            let handle = handle.clone();
            async move {
                handle
                    .request("fuel_gauge get", ResponseMatcher::literal("fuel_gauge get"), None, true)
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        feed_response(&line_tx, "fuel_gauge get", &["Value: 1"]).await;
        request.await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(
            event,
            ShellEvent::CommandResolved {
                command: "fuel_gauge get".to_string(),
                response: "Value: 1".to_string(),
                success: true,
            }
        );
    }

    #[tokio::test]
    async fn test_pause_gates_sending_until_resume() {
        let (mock, line_tx, handle, _events) = spawn_channel(Duration::from_secs(1));

        handle.pause().await;

        let request = tokio::spawn({
            let handle = handle.clone();
            async move {
                handle
                    .request("fuel_gauge get", ResponseMatcher::literal("fuel_gauge get"), None, true)
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(mock.sent().is_empty(), "paused channel must not write");

        handle.resume().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(mock.sent(), vec!["fuel_gauge get"]);

        feed_response(&line_tx, "fuel_gauge get", &["Value: 1"]).await;
        assert!(request.await.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_write_failure_rejects_and_reports_io_error() {
        let (mock, _line_tx, handle, mut events) = spawn_channel(Duration::from_secs(1));
        mock.set_write_error(std::io::ErrorKind::BrokenPipe);

        let outcome = handle
            .request("fuel_gauge get", ResponseMatcher::literal("fuel_gauge get"), None, true)
            .await;

        assert!(matches!(outcome, CommandOutcome::Rejected(_)));
        let event = events.recv().await.unwrap();
        assert!(matches!(event, ShellEvent::IoError(_)));
    }

    #[tokio::test]
    async fn test_link_closed_fails_pending_requests() {
        let (_mock, line_tx, handle, mut events) = spawn_channel(Duration::from_secs(5));

        let request = tokio::spawn({
            let handle = handle.clone();
            async move {
                handle
                    .request("fuel_gauge get", ResponseMatcher::literal("fuel_gauge get"), None, true)
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(line_tx);

        assert_eq!(
            request.await.unwrap(),
            CommandOutcome::Rejected(NO_CONNECTION.to_string())
        );

        // the session is told the link is gone
        let mut saw_link_closed = false;
        while let Some(event) = events.recv().await {
            if event == ShellEvent::LinkClosed {
                saw_link_closed = true;
                break;
            }
        }
        assert!(saw_link_closed);
    }

    #[test]
    fn test_matcher_literal_and_get_set() {
        let literal = ResponseMatcher::literal("cc_profile start");
        assert!(literal.matches("cc_profile start"));
        assert!(literal.matches("  cc_profile start  "));
        assert!(!literal.matches("cc_profile stop"));

        let get_set = ResponseMatcher::get_set("npmx buck voltage normal");
        assert!(get_set.matches("npmx buck voltage normal get 0"));
        assert!(get_set.matches("npmx buck voltage normal set 0 1800 mV"));
        assert!(!get_set.matches("npmx buck voltage retention get 0"));
        assert!(!get_set.matches("npmx buck voltage normal status 0"));
    }

    #[test]
    fn test_error_response_detection() {
        assert!(is_error_response("error: invalid parameter"));
        assert!(is_error_response("Error: out of range"));
        assert!(is_error_response("Unknown command: npmx frobnicate"));
        assert!(is_error_response("IO error during transfer"));
        assert!(!is_error_response("Value: 800"));
    }
}
