//! Interpreter walking a workflow graph
//!
//! One activity runs at a time. Every activity except SUCCESS and FAILED
//! yields an outcome: `true` follows `next`, `false` follows `other`, and a
//! missing edge ends the run. Runtime problems (bad expressions, missing
//! capabilities, unknown sub-workflows) never abort the loop; they fail the
//! current activity with a diagnostic in the result register.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agent::Role;
use crate::commands::parser::Parser;
use crate::commands::Command;
use crate::constants::DEFAULT_MAX_HITS;
use crate::text::preview;
use crate::workflow::context::{ConsoleOperator, Context, Operator};
use crate::workflow::history::History;
use crate::workflow::operation::Operation;
use crate::workflow::reader::WorkflowReader;
use crate::workflow::types::{Activity, ActivityKind, Status, Workflow};

/// State machine over the activities of one workflow
#[derive(Debug)]
pub struct Interpreter {
    max_hits: u32,
    hits: HashMap<String, u32>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HITS)
    }
}

impl Interpreter {
    /// An activity may run `max_hits` times per run
    pub fn new(max_hits: u32) -> Self {
        Self {
            max_hits,
            hits: HashMap::new(),
        }
    }

    /// Number of visits of an activity so far
    pub fn hits(&self, name: &str) -> u32 {
        self.hits.get(name).copied().unwrap_or(0)
    }

    /// Run the workflow of `ctx` to its end and return `(status, result)`
    pub fn run<'a>(
        &'a mut self,
        ctx: &'a mut Context,
        history: &'a mut History,
    ) -> BoxFuture<'a, (Status, String)> {
        Box::pin(async move {
            let workflow = Arc::clone(&ctx.workflow);
            info!("Running workflow {:?}", workflow.name);

            let mut current = workflow.start.clone();
            if current.is_none() {
                ctx.fail("Workflow has no START activity");
            }

            while let Some(name) = current.take() {
                let Some(activity) = workflow.activity(&name) else {
                    ctx.fail(&format!("Activity {} is not defined", name));
                    current = self.finish(ctx, history, false, None);
                    continue;
                };

                let hits = self.hits.entry(name.clone()).or_insert(0);
                *hits += 1;
                if *hits > self.max_hits {
                    warn!("Activity {} exceeded {} executions", name, self.max_hits);
                    ctx.fail(&format!(
                        "Too many executions of {} (max {})",
                        name, self.max_hits
                    ));
                    current = self.finish(ctx, history, false, Some(activity));
                    continue;
                }

                debug!("Visiting {} ({})", name, activity.kind);
                current = match activity.kind {
                    ActivityKind::Success => self.finish(ctx, history, true, Some(activity)),
                    ActivityKind::Failed => self.finish(ctx, history, false, Some(activity)),
                    _ => {
                        let outcome = self.visit(activity, ctx, history).await;
                        let edge = if outcome { &activity.next } else { &activity.other };
                        match edge {
                            Some(next) => Some(next.clone()),
                            None => self.finish(ctx, history, outcome, Some(activity)),
                        }
                    }
                };
            }

            history.save(&workflow, None, &ctx.variables);
            (ctx.status, ctx.result.clone())
        })
    }

    /// End the run, or redirect to an event handler not visited yet
    fn finish(
        &mut self,
        ctx: &mut Context,
        history: &mut History,
        success: bool,
        activity: Option<&Activity>,
    ) -> Option<String> {
        let workflow = Arc::clone(&ctx.workflow);
        let handler = if success {
            &workflow.on_success
        } else {
            &workflow.on_failed
        };
        if let Some(handler) = handler {
            if self.hits(handler) == 0 {
                info!("Continuing with event handler {}", handler);
                return Some(handler.clone());
            }
        }

        ctx.status = if success { Status::Success } else { Status::Failed };
        if success {
            info!("SUCCESS result: {}", preview(&ctx.result));
        } else if ctx.result.is_empty() {
            warn!("FAILED without result");
        } else {
            warn!("FAILED result: {}", preview(&ctx.result));
        }
        let caption = if success {
            ActivityKind::Success.label()
        } else {
            ActivityKind::Failed.label()
        };
        record(ctx, history, activity, caption);
        None
    }

    async fn visit(
        &mut self,
        activity: &Activity,
        ctx: &mut Context,
        history: &mut History,
    ) -> bool {
        match activity.kind {
            ActivityKind::Start => {
                info!("START: {}", ctx.workflow.name);
                ctx.status = Status::Doing;
                record(ctx, history, Some(activity), &caption(activity));
                true
            }
            ActivityKind::On => {
                record(ctx, history, Some(activity), &activity.name);
                true
            }
            ActivityKind::Set => visit_set(activity, ctx, history),
            ActivityKind::Assign => visit_assign(activity, ctx, history),
            ActivityKind::Check => visit_check(activity, ctx, history),
            ActivityKind::Prompt => visit_prompt(activity, ctx, history).await,
            ActivityKind::Ask => visit_ask(activity, ctx, history).await,
            ActivityKind::Execute => visit_execute(activity, ctx, history).await,
            ActivityKind::Call => self.visit_call(activity, ctx, history).await,
            ActivityKind::Success | ActivityKind::Failed => true,
        }
    }

    async fn visit_call(
        &mut self,
        activity: &Activity,
        ctx: &mut Context,
        history: &mut History,
    ) -> bool {
        let file = ctx.render(activity.expression.trim());
        if file.is_empty() {
            return reject(ctx, history, activity, "CALL needs a workflow file");
        }
        let path = ctx.workflow.directory.join(&file);
        let sub = match WorkflowReader::load_from_file(&path) {
            Ok(sub) => sub,
            Err(e) => {
                let message = format!("CALL {} failed: {}", file, e);
                return reject(ctx, history, activity, &message);
            }
        };
        info!("CALL: {}", path.display());
        record(ctx, history, Some(activity), &caption(activity));

        let mut child = enter_sub_workflow(ctx, sub);
        let mut interpreter = Interpreter::new(self.max_hits);
        let (status, result) = interpreter.run(&mut child, history).await;
        leave_sub_workflow(ctx, child, result);

        info!("CALL: {} ended with {}", file, status);
        status != Status::Failed
    }
}

/// Child context sharing the capabilities and a copy of the state
fn enter_sub_workflow(ctx: &mut Context, sub: Workflow) -> Context {
    let mut child = Context::new(Arc::new(sub));
    for (name, value) in &ctx.variables {
        child.variables.insert(name.clone(), value.clone());
    }
    child.result = ctx.result.clone();
    child.agent = ctx.agent.take();
    child.executor = ctx.executor.take();
    child.operator = take_operator(&mut ctx.operator);
    child
}

fn leave_sub_workflow(ctx: &mut Context, mut child: Context, result: String) {
    ctx.agent = child.agent.take();
    ctx.executor = child.executor.take();
    ctx.operator = take_operator(&mut child.operator);
    ctx.variables.extend(child.variables);
    ctx.result = result;
}

fn take_operator(operator: &mut Box<dyn Operator>) -> Box<dyn Operator> {
    std::mem::replace(operator, Box::new(ConsoleOperator::default()))
}

fn visit_set(activity: &Activity, ctx: &mut Context, history: &mut History) -> bool {
    let Some((name, value)) = activity.expression.split_once('=') else {
        let message = format!(
            "SET expression {} is not valid!\nSyntax: <variable>=<value>",
            activity.expression
        );
        return reject(ctx, history, activity, &message);
    };
    let name = name.trim();
    if name.is_empty() {
        let message = format!("SET expression {} has no variable", activity.expression);
        return reject(ctx, history, activity, &message);
    }

    let value = value.trim();
    let value = ctx.render(&ctx.get_value_or(value, value));
    info!("SET: {}={:?}", name, preview(&value));
    ctx.set_value(name, &value);
    record(ctx, history, Some(activity), &caption(activity));
    true
}

fn visit_assign(activity: &Activity, ctx: &mut Context, history: &mut History) -> bool {
    let Some(content) = ctx.get_value(activity.expression.trim()) else {
        let message = format!("ASSIGN value {:?} is not set!", activity.expression);
        return reject(ctx, history, activity, &message);
    };
    ctx.result = ctx.render(&content);
    info!("ASSIGN: {}", preview(&ctx.result));
    record(ctx, history, Some(activity), &caption(activity));
    true
}

fn visit_check(activity: &Activity, ctx: &mut Context, history: &mut History) -> bool {
    let invalid = format!(
        "CHECK expression {} is not valid!\nSyntax: <variable> <operation> <expected>",
        activity.expression
    );
    let parts: Vec<&str> = activity.expression.split_whitespace().collect();
    if parts.len() < 3 {
        return reject(ctx, history, activity, &invalid);
    }

    let left = ctx.get_value(parts[0]);
    let operation = parts[1].parse::<Operation>();
    let right_text = parts[2..].join(" ");
    let right = ctx.get_value_or(&right_text, &right_text);
    let (Some(left), Ok(operation)) = (left, operation) else {
        return reject(ctx, history, activity, &invalid);
    };

    info!("CHECK: {} {} {:?}", preview(&left), operation, right);
    match operation.evaluate(&left, &right) {
        Ok(outcome) => {
            record(ctx, history, Some(activity), &caption(activity));
            debug!("CHECK outcome: {}", outcome);
            outcome
        }
        Err(e) => {
            let message = format!("CHECK pattern {:?} is not valid: {}", right, e);
            reject(ctx, history, activity, &message)
        }
    }
}

async fn visit_prompt(activity: &Activity, ctx: &mut Context, history: &mut History) -> bool {
    let id = activity.expression.trim();
    let role = ctx
        .workflow
        .prompt(id)
        .map(|prompt| prompt.role)
        .unwrap_or_else(|| Role::infer_from_id(id));
    let Some(content) = ctx.get_value(id) else {
        let message = format!("PROMPT content is not set or not found! prompt_id={}", id);
        return reject(ctx, history, activity, &message);
    };
    if ctx.agent.is_none() {
        return reject(ctx, history, activity, "PROMPT needs an agent, none is set");
    }

    let content = ctx.render(&content);
    info!("PROMPT: role={}, content={}", role, preview(&content));
    let index = record(
        ctx,
        history,
        Some(activity),
        &caption(activity),
    );
    history.update_result(index, &format!("{}\n\n---\n\n...", content));

    let reply = match ctx.agent.as_mut() {
        Some(agent) => match role {
            Role::System => agent.system(&content).await.map(|_| String::new()),
            Role::Assistant => {
                agent.advice(None, Some(&content));
                Ok(content.clone())
            }
            Role::User => agent.ask(&content).await,
        },
        None => Ok(String::new()),
    };

    let outcome = match reply {
        Ok(reply) => {
            info!("PROMPT: result: {}", preview(&reply));
            ctx.result = reply;
            true
        }
        Err(e) => {
            ctx.fail(&format!("PROMPT {} failed: {}", id, e));
            false
        }
    };
    history.update_result(index, &format!("{}\n\n---\n\n{}", content, ctx.result));
    history.save(&ctx.workflow, Some(&activity.name), &ctx.variables);
    outcome
}

async fn visit_ask(activity: &Activity, ctx: &mut Context, history: &mut History) -> bool {
    let question = ctx.result.clone();
    info!("ASK: {}", preview(&question));
    let index = record(ctx, history, Some(activity), &caption(activity));
    history.update_result(index, "...");

    let outcome = match ctx.operator.ask(&question).await {
        Some(answer) => {
            ctx.result = answer;
            true
        }
        None => {
            ctx.fail("Interrupted by user!");
            false
        }
    };
    history.update_result(
        index,
        &format!("Input:\n{}\n\nOutput:\n{}\n\n", question, ctx.result),
    );
    history.save(&ctx.workflow, Some(&activity.name), &ctx.variables);
    outcome
}

async fn visit_execute(activity: &Activity, ctx: &mut Context, history: &mut History) -> bool {
    if ctx.executor.is_none() {
        return reject(ctx, history, activity, "Command executor is not set!");
    }

    let expression = activity.expression.trim();
    let mut commands: Vec<Command> = if expression.is_empty() {
        Parser::new().parse(&ctx.result)
    } else {
        Command::shell(&ctx.render(expression)).into_iter().collect()
    };
    info!("EXECUTE: {} command(s)", commands.len());
    let index = record(ctx, history, Some(activity), &caption(activity));
    history.update_result(index, "...");

    let mut result = String::new();
    let mut log = String::new();
    let mut outcome = true;
    if let Some(executor) = ctx.executor.as_mut() {
        for command in commands.iter_mut() {
            if executor.execute(command).await != 0 {
                outcome = false;
            }
            log.push_str("Input:\n```shell\n");
            for line in &command.cmds {
                result.push_str(&format!("$ {}\n", line));
                log.push_str(&format!("{}\n", line));
            }
            if command.output.is_empty() {
                result.push('\n');
                log.push_str("```\n\nNo Output\n\n");
            } else {
                result.push_str(&format!("{}\n", command.output));
                log.push_str(&format!(
                    "```\n\nOutput:\n```shell\n{}\n```\n\n",
                    command.output
                ));
            }
        }
    }
    if commands.is_empty() {
        debug!("EXECUTE: no commands found");
        log.push_str("No commands found\n");
    }

    ctx.result = result;
    history.update_result(index, &log);
    history.save(&ctx.workflow, Some(&activity.name), &ctx.variables);
    outcome
}

/// History caption of an activity
fn caption(activity: &Activity) -> String {
    let expression = activity.expression.trim();
    if expression.is_empty() {
        activity.kind.label().to_string()
    } else {
        format!("{}: {}", activity.kind.label(), expression)
    }
}

/// Fail the activity with a diagnostic and record it
fn reject(ctx: &mut Context, history: &mut History, activity: &Activity, message: &str) -> bool {
    warn!("{}: {}", activity.name, message);
    ctx.fail(message);
    record(ctx, history, Some(activity), &caption(activity));
    false
}

/// Add a history record with the current state and write the snapshot
fn record(
    ctx: &Context,
    history: &mut History,
    activity: Option<&Activity>,
    caption: &str,
) -> usize {
    let index = history.add_record(caption, ctx.status, &ctx.result);
    let current = activity.map(|a| a.name.as_str());
    history.save(&ctx.workflow, current, &ctx.variables);
    index
}
