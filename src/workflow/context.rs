//! Context for workflow execution
//!
//! Handles the status, the result register, variables and placeholder
//! rendering of a single run. The agent, the command executor and the
//! operator console are capabilities plugged into the context from outside.

use async_trait::async_trait;
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use indexmap::IndexMap;
use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::agent::{Agent, ConsoleInput};
use crate::commands::CommandExecutor;
use crate::constants::MAX_VARIABLE_NAME_LENGTH;
use crate::text::preview;
use crate::workflow::types::{Status, Workflow};

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{\{(\w*)\}\}").unwrap();
}

const STATUS_VARIABLE: &str = "STATUS";
const RESULT_VARIABLES: [&str; 2] = ["RESULT", "CONTENT"];
const FILE_PREFIX: &str = "file:";

/// Operator console used by ASK activities
#[async_trait]
pub trait Operator: Send {
    /// Show `text` and read one line; None when the operator interrupted
    async fn ask(&mut self, text: &str) -> Option<String>;
}

/// Operator on the console; Ctrl+C interrupts
#[derive(Clone, Default)]
pub struct ConsoleOperator {
    input: ConsoleInput,
}

impl ConsoleOperator {
    /// Operator reading from `input`, which may be shared with a console agent
    pub fn new(input: ConsoleInput) -> Self {
        Self { input }
    }
}

#[async_trait]
impl Operator for ConsoleOperator {
    async fn ask(&mut self, text: &str) -> Option<String> {
        let mut stdout = std::io::stdout();
        let _ = crossterm::execute!(
            stdout,
            SetForegroundColor(Color::Cyan),
            Print(text),
            ResetColor,
            Print("\n")
        );

        tokio::select! {
            read = self.input.read_line() => read.unwrap_or_else(|e| {
                warn!("Failed to read operator input: {}", e);
                None
            }),
            _ = tokio::signal::ctrl_c() => None,
        }
    }
}

/// Mutable state of one workflow run
pub struct Context {
    pub workflow: Arc<Workflow>,

    pub status: Status,

    /// Current value handed from one activity to the next
    pub result: String,

    /// Variables, seeded from the workflow params
    pub variables: IndexMap<String, String>,

    pub agent: Option<Box<dyn Agent>>,

    pub executor: Option<Box<dyn CommandExecutor>>,

    pub operator: Box<dyn Operator>,
}

impl Context {
    /// Create a new context for `workflow` with its params as variables
    pub fn new(workflow: Arc<Workflow>) -> Self {
        let variables = workflow.params.clone();
        Self {
            workflow,
            status: Status::Created,
            result: String::new(),
            variables,
            agent: None,
            executor: None,
            operator: Box::new(ConsoleOperator::default()),
        }
    }

    pub fn with_agent(mut self, agent: Box<dyn Agent>) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_executor(mut self, executor: Box<dyn CommandExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_operator(mut self, operator: Box<dyn Operator>) -> Self {
        self.operator = operator;
        self
    }

    /// Resolve a name to its value
    ///
    /// Lookup order: `'constant'`, STATUS, RESULT/CONTENT, `file:<path>`,
    /// variables (a `file:` value is read from disk), prompts by id, the
    /// process environment. Names longer than 100 characters are never
    /// looked up.
    pub fn get_value(&self, name: &str) -> Option<String> {
        if name.is_empty() {
            return None;
        }
        if let Some(constant) = constant_text(name) {
            return Some(constant.to_string());
        }
        if name.chars().count() > MAX_VARIABLE_NAME_LENGTH {
            return None;
        }

        if name == STATUS_VARIABLE {
            return Some(self.status.to_string());
        }
        if RESULT_VARIABLES.contains(&name) {
            return Some(self.result.clone());
        }
        if let Some(file) = name.strip_prefix(FILE_PREFIX) {
            return self.read_file(file);
        }
        if let Some(value) = self.variables.get(name) {
            return match value.strip_prefix(FILE_PREFIX) {
                Some(file) => self.read_file(file),
                None => Some(value.clone()),
            };
        }
        if let Some(prompt) = self.workflow.prompt(name) {
            return Some(prompt.content.clone());
        }
        if name.contains(['=', '\0']) {
            return None;
        }
        std::env::var(name).ok()
    }

    /// Resolve `name`, falling back to `default`
    pub fn get_value_or(&self, name: &str, default: &str) -> String {
        self.get_value(name).unwrap_or_else(|| default.to_string())
    }

    /// Store a value under `name`
    ///
    /// Constants cannot be assigned; STATUS only accepts a valid status.
    pub fn set_value(&mut self, name: &str, value: &str) {
        if name.is_empty() {
            warn!("Variable name for value {:?} is not set", preview(value));
            return;
        }
        if constant_text(name).is_some() {
            warn!("Constant {} cannot be set", name);
            return;
        }
        if name.chars().count() > MAX_VARIABLE_NAME_LENGTH {
            warn!("Variable name {:?} is too long", preview(name));
            return;
        }

        if name == STATUS_VARIABLE {
            match value.parse::<Status>() {
                Ok(status) => self.status = status,
                Err(e) => warn!("Ignoring STATUS value: {}", e),
            }
            return;
        }
        if RESULT_VARIABLES.contains(&name) {
            self.result = value.to_string();
            return;
        }
        if let Some(file) = name.strip_prefix(FILE_PREFIX) {
            self.write_file(file, value);
            return;
        }
        self.variables.insert(name.to_string(), value.to_string());
    }

    /// Replace `{{name}}` placeholders with resolved values
    ///
    /// Unresolved placeholders are left untouched.
    pub fn render(&self, content: &str) -> String {
        PLACEHOLDER
            .replace_all(content, |captures: &Captures| {
                self.get_value(&captures[1])
                    .unwrap_or_else(|| captures[0].to_string())
            })
            .into_owned()
    }

    /// Mark the run failed, putting `message` in front of the result
    pub fn fail(&mut self, message: &str) {
        self.status = Status::Failed;
        self.result = if self.result.is_empty() {
            message.to_string()
        } else {
            format!("{}  \n{}", message, self.result)
        };
    }

    fn file_path(&self, file: &str) -> PathBuf {
        self.workflow.directory.join(file.trim())
    }

    fn read_file(&self, file: &str) -> Option<String> {
        let path = self.file_path(file);
        debug!("Reading variable file {}", path.display());
        match fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) => {
                warn!("Cannot read {}: {}", path.display(), e);
                None
            }
        }
    }

    fn write_file(&self, file: &str, value: &str) {
        let path = self.file_path(file);
        debug!("Writing variable file {}", path.display());
        if let Err(e) = fs::write(&path, value) {
            warn!("Cannot write {}: {}", path.display(), e);
        }
    }
}

/// Text of a `'quoted'` constant
fn constant_text(name: &str) -> Option<&str> {
    if name.len() >= 2 && name.starts_with('\'') && name.ends_with('\'') {
        Some(&name[1..name.len() - 1])
    } else {
        None
    }
}

#[cfg(test)]
pub mod testing {
    //! Operator double with queued answers

    use super::*;
    use std::collections::VecDeque;

    pub struct ScriptedOperator {
        answers: VecDeque<Option<String>>,
    }

    impl ScriptedOperator {
        /// `None` entries simulate an interrupt
        pub fn new(answers: &[Option<&str>]) -> Self {
            Self {
                answers: answers.iter().map(|a| a.map(str::to_string)).collect(),
            }
        }
    }

    #[async_trait]
    impl Operator for ScriptedOperator {
        async fn ask(&mut self, _text: &str) -> Option<String> {
            self.answers.pop_front().flatten()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Prompt, Role};

    fn context() -> Context {
        let mut workflow = Workflow::default();
        workflow.params.insert("repo".to_string(), "https://github.com".to_string());
        workflow.params.insert("RESULT".to_string(), "shadowed".to_string());
        workflow
            .prompts
            .insert("User Hello".to_string(), Prompt::new(Role::User, "Hi {{repo}}"));
        Context::new(Arc::new(workflow))
    }

    #[tokio::test]
    async fn test_console_operator_shares_input_with_agent() {
        let input: &'static [u8] = b"yes\nno\nagent answer\n.\n";
        let console = ConsoleInput::from_reader(input);
        let mut operator = ConsoleOperator::new(console.clone());
        let mut agent = crate::agent::ConsoleAgent::with_console(console).quiet();

        assert_eq!(operator.ask("first?").await.as_deref(), Some("yes"));
        assert_eq!(operator.ask("second?").await.as_deref(), Some("no"));
        assert_eq!(agent.ask("agent?").await.unwrap(), "agent answer");
        assert_eq!(operator.ask("more?").await, None);
    }

    #[test]
    fn test_params_seed_variables() {
        let ctx = context();
        assert_eq!(ctx.get_value("repo").as_deref(), Some("https://github.com"));
        assert_eq!(ctx.status, Status::Created);
    }

    #[test]
    fn test_constants() {
        let ctx = context();
        assert_eq!(ctx.get_value("'hello'").as_deref(), Some("hello"));
        assert_eq!(ctx.get_value("''").as_deref(), Some(""));
        assert_eq!(ctx.get_value(&"x".repeat(101)), None);
    }

    #[test]
    fn test_result_shadows_variable() {
        let mut ctx = context();
        ctx.result = "register".to_string();
        assert_eq!(ctx.get_value("RESULT").as_deref(), Some("register"));
        assert_eq!(ctx.get_value("CONTENT").as_deref(), Some("register"));

        ctx.set_value("RESULT", "new");
        assert_eq!(ctx.result, "new");
        assert_eq!(ctx.variables.get("RESULT").unwrap(), "shadowed");
    }

    #[test]
    fn test_status_variable() {
        let mut ctx = context();
        ctx.set_value("STATUS", "DOING");
        assert_eq!(ctx.get_value("STATUS").as_deref(), Some("DOING"));
        ctx.set_value("STATUS", "BROKEN");
        assert_eq!(ctx.status, Status::Doing);
    }

    #[test]
    fn test_prompt_and_environment_fallback() {
        let ctx = context();
        assert_eq!(ctx.get_value("User Hello").as_deref(), Some("Hi {{repo}}"));
        std::env::set_var("CODEMENTOR_TEST_VARIABLE", "from env");
        assert_eq!(
            ctx.get_value("CODEMENTOR_TEST_VARIABLE").as_deref(),
            Some("from env")
        );
        assert_eq!(ctx.get_value("NOT_DEFINED_ANYWHERE_42"), None);
    }

    #[test]
    fn test_constants_cannot_be_set() {
        let mut ctx = context();
        ctx.set_value("'x'", "1");
        ctx.set_value("", "1");
        assert_eq!(ctx.variables.len(), 2);
    }

    #[test]
    fn test_file_variables() {
        let dir = tempfile::tempdir().unwrap();
        let workflow = Workflow {
            directory: dir.path().to_path_buf(),
            ..Default::default()
        };
        let mut ctx = Context::new(Arc::new(workflow));

        ctx.set_value("file:out.md", "written");
        assert_eq!(
            fs::read_to_string(dir.path().join("out.md")).unwrap(),
            "written"
        );
        assert_eq!(ctx.get_value("file:out.md").as_deref(), Some("written"));

        ctx.set_value("report", "file:out.md");
        assert_eq!(ctx.get_value("report").as_deref(), Some("written"));
        assert_eq!(ctx.get_value("file:missing.md"), None);
    }

    #[test]
    fn test_render_placeholders() {
        let mut ctx = context();
        ctx.result = "42".to_string();
        assert_eq!(
            ctx.render("repo={{repo}} answer={{RESULT}} keep={{unknown_name_xyz}}"),
            "repo=https://github.com answer=42 keep={{unknown_name_xyz}}"
        );
    }

    #[test]
    fn test_fail_prepends_message() {
        let mut ctx = context();
        ctx.result = "earlier".to_string();
        ctx.fail("broken");
        assert_eq!(ctx.status, Status::Failed);
        assert_eq!(ctx.result, "broken  \nearlier");
    }
}
