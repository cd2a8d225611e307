//! A rule-based command channel for scenario tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::channel::{CommandChannel, CommandOutput};
use crate::errors::ChannelError;

/// What a scripted rule answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedReply {
    /// The command ran and produced this output.
    Output(CommandOutput),
    /// The channel timed out.
    Timeout,
    /// The connection dropped.
    ConnectionLost,
}

impl From<CommandOutput> for ScriptedReply {
    fn from(output: CommandOutput) -> Self {
        Self::Output(output)
    }
}

impl ScriptedReply {
    fn into_result(self, host: &str) -> Result<CommandOutput, ChannelError> {
        match self {
            Self::Output(output) => Ok(output),
            Self::Timeout => Err(ChannelError::Timeout { seconds: 60 }),
            Self::ConnectionLost => Err(ChannelError::Connection {
                host: host.to_string(),
                detail: "Connection reset by peer".to_string(),
            }),
        }
    }
}

#[derive(Debug)]
struct Rule {
    pattern: String,
    queued: VecDeque<ScriptedReply>,
    fallback: Option<ScriptedReply>,
}

impl Rule {
    fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            queued: VecDeque::new(),
            fallback: None,
        }
    }
}

/// Answers commands from a list of rules and records every call.
///
/// A rule whose pattern equals the command wins; otherwise the first rule
/// (in registration order) whose pattern occurs in the command answers.
/// Queued replies are consumed first, then the rule's standing reply is
/// repeated. Unmatched commands exit 127.
#[derive(Debug, Default)]
pub struct ScriptedChannel {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<(String, bool)>>,
}

impl ScriptedChannel {
    /// Creates a channel with no rules.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn rule_mut<'a>(rules: &'a mut Vec<Rule>, pattern: &str) -> &'a mut Rule {
        let index = match rules.iter().position(|r| r.pattern == pattern) {
            Some(index) => index,
            None => {
                rules.push(Rule::new(pattern));
                rules.len() - 1
            }
        };
        &mut rules[index]
    }

    /// Answers every matching command with `reply`.
    #[must_use]
    pub fn on(self, pattern: &str, reply: impl Into<ScriptedReply>) -> Self {
        Self::rule_mut(&mut self.rules.lock(), pattern).fallback = Some(reply.into());
        self
    }

    /// Answers the next matching command with `reply`, once.
    #[must_use]
    pub fn on_first(self, pattern: &str, reply: impl Into<ScriptedReply>) -> Self {
        Self::rule_mut(&mut self.rules.lock(), pattern)
            .queued
            .push_back(reply.into());
        self
    }

    /// Every `(command, sudo)` pair received, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().clone()
    }

    /// Commands containing `pattern`.
    #[must_use]
    pub fn calls_matching(&self, pattern: &str) -> Vec<(String, bool)> {
        self.calls
            .lock()
            .iter()
            .filter(|(command, _)| command.contains(pattern))
            .cloned()
            .collect()
    }

    fn answer(&self, command: &str) -> ScriptedReply {
        let mut rules = self.rules.lock();
        let index = rules
            .iter()
            .position(|r| r.pattern == command)
            .or_else(|| rules.iter().position(|r| command.contains(r.pattern.as_str())));

        let Some(index) = index else {
            return CommandOutput::new(127, "", format!("unscripted command: {command}")).into();
        };
        let rule = &mut rules[index];
        rule.queued
            .pop_front()
            .or_else(|| rule.fallback.clone())
            .unwrap_or_else(|| CommandOutput::new(127, "", "rule exhausted").into())
    }
}

#[async_trait]
impl CommandChannel for ScriptedChannel {
    async fn execute(&self, command: &str, sudo: bool) -> Result<CommandOutput, ChannelError> {
        self.calls.lock().push((command.to_string(), sudo));
        self.answer(command).into_result("scripted")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queued_then_standing_reply() {
        let channel = ScriptedChannel::new()
            .on("uname", CommandOutput::ok("Darwin"))
            .on_first("uname", ScriptedReply::Timeout);

        assert!(channel.execute("uname -s", false).await.is_err());
        assert_eq!(channel.execute("uname -s", false).await.unwrap().stdout, "Darwin");
        assert_eq!(channel.execute("uname -s", true).await.unwrap().stdout, "Darwin");
        assert_eq!(channel.calls().len(), 3);
        assert!(channel.calls()[2].1);
    }

    #[tokio::test]
    async fn test_exact_match_wins_over_substring() {
        let channel = ScriptedChannel::new()
            .on("ps -axo", CommandOutput::ok("snapshot"))
            .on("ps -axo pid=,comm=", CommandOutput::ok("listing"));

        let output = channel.execute("ps -axo pid=,comm=", false).await.unwrap();
        assert_eq!(output.stdout, "listing");
        let output = channel.execute("ps -axo pid=,comm= > x", false).await.unwrap();
        assert_eq!(output.stdout, "snapshot");
    }

    #[tokio::test]
    async fn test_unmatched_command_exits_127() {
        let channel = ScriptedChannel::new();
        let output = channel.execute("whoami", false).await.unwrap();
        assert_eq!(output.exit_code, 127);
        assert_eq!(channel.calls_matching("who").len(), 1);
    }
}
