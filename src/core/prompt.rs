//! Yes/no prompts for the text-mode flow.

use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Write};

/// Message printed when an answer is neither yes nor no.
pub const REPROMPT: &str = "Please type a word that starts with 'Y' or 'N'.";

/// Source of answers and sink for the transcript of the text-mode flow.
pub trait Prompter: Send {
    /// Print text without reading anything.
    fn print(&mut self, text: &str);

    /// Show `prompt` and read one line. `None` at end of input.
    fn read_line(&mut self, prompt: &str) -> Option<String>;

    /// Ask a yes/no question. An empty answer or end of input picks `default`.
    fn yes_or_no(&mut self, prompt: &str, default: bool) -> bool {
        loop {
            let Some(answer) = self.read_line(prompt) else {
                return default;
            };
            match answer.trim().chars().next().map(|c| c.to_ascii_lowercase()) {
                None => return default,
                Some('y') => return true,
                Some('n') => return false,
                Some(_) => self.print(&format!("{REPROMPT}\n")),
            }
        }
    }
}

/// Prompter over a reader and a writer, normally stdin and stdout.
pub struct LinePrompter<R, W> {
    input: R,
    output: W,
}

impl LinePrompter<BufReader<io::Stdin>, io::Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R: BufRead + Send, W: Write + Send> LinePrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }
}

impl<R: BufRead + Send, W: Write + Send> Prompter for LinePrompter<R, W> {
    fn print(&mut self, text: &str) {
        if let Err(e) = self.output.write_all(text.as_bytes()).and_then(|_| self.output.flush()) {
            tracing::warn!(error = %e, "failed to write prompt output");
        }
    }

    fn read_line(&mut self, prompt: &str) -> Option<String> {
        self.print(prompt);
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line.trim_end_matches(['\n', '\r']).to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read answer");
                None
            }
        }
    }
}

/// Prompter answering from a fixed script and recording the transcript.
#[derive(Debug, Default, Clone)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    transcript: String,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            transcript: String::new(),
        }
    }

    /// Everything printed so far, prompts and echoed answers included.
    pub fn transcript(&self) -> &str {
        &self.transcript
    }

    /// Answers not consumed yet.
    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl Prompter for ScriptedPrompter {
    fn print(&mut self, text: &str) {
        self.transcript.push_str(text);
    }

    fn read_line(&mut self, prompt: &str) -> Option<String> {
        self.transcript.push_str(prompt);
        let answer = self.answers.pop_front()?;
        self.transcript.push_str(&answer);
        self.transcript.push('\n');
        Some(answer)
    }
}
