//! The task loop (spec.md §4.7): drives a `Task` through plan/act/observe
//! iterations to a terminal state, emitting an `EventEnvelope` for every
//! meaningful transition. Adapted from the teacher's
//! `AgenticOrchestrator::run`/`run_inner` (`agent/orchestrator.rs`) and
//! `executor::execute_tools` (`agent/executor.rs`): same spawn-a-task/
//! event-channel/input-channel shape, generalized from a single chat
//! session streaming text to a plan of steps calling a tool-schema API.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::adapters::{MemoryGraph, PersonaLearner, TaskLearner};
use crate::context::compactor::{CompactionOutcome, Compactor};
use crate::context::selector::{select_tools, ModelTier};
use crate::coordinator::{ChildTaskSpec, Coordinator, SpecialistKind, SubAgentResult, TaskRunner};
use crate::diagnostics::failover::ModelChain;
use crate::diagnostics::DiagnosticTracker;
use crate::events::EventBus;
use crate::guardrails::{Decision, Guardrails};
use crate::llm::{GenerationRequest, LlmProvider, Message, ToolGenerationRequest, ToolSpec};
use crate::observability::MetricsCollector;
use crate::planner::Planner;
use crate::storage::{SharedDatabase, TaskStore};
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::approval::ApprovalRequest;
use crate::types::event::{Event, EventEnvelope};
use crate::types::plan::StepStatus;
use crate::types::task::{GuardrailConfig, Task, TaskStatus};
use crate::types::tool::{RiskLevel, ToolCall, ToolDefinition, ToolResult as TypedToolResult};

use super::events::LoopInput;

/// spec.md §4.7 failure semantics: three failed steps (not just three
/// failed attempts within one step) fails the whole task.
const MAX_FAILED_STEPS: usize = 3;
const APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Shared, cloneable services a loop instance (parent or delegated child)
/// needs. `registry` is per-instance because a child gets a filtered view
/// from the Coordinator; everything else is shared by reference.
///
/// `persistence`/`event_bus` back spec.md §4.9's write policy: every
/// state-changing transition both upserts the task row and publishes
/// through the bus, so a late subscriber replays the ring instead of
/// missing history.
pub struct AgentLoopServices {
    pub provider: Arc<dyn LlmProvider>,
    pub registry: ToolRegistry,
    pub guardrails: Arc<Guardrails>,
    pub coordinator: Arc<Coordinator>,
    pub persistence: SharedDatabase,
    pub event_bus: Arc<EventBus>,
    pub metrics: Arc<MetricsCollector>,
    /// `None` when no knowledge/persona/graph collaborator is configured
    /// for this deployment; the loop then runs without C14 enrichment.
    pub learner: Option<Arc<TaskLearner>>,
    pub persona: Option<Arc<PersonaLearner>>,
    pub memory_graph: Option<Arc<MemoryGraph>>,
}

/// Drives one task. Constructed fresh per top-level task; also
/// constructed internally, with a filtered registry, to run a delegated
/// child (see the `TaskRunner` impl below).
pub struct AgentLoop {
    services: AgentLoopServices,
    planner: Planner,
    compactor: Compactor,
    model_chain: Mutex<ModelChain>,
    tier: ModelTier,
    /// Used only to price the metrics snapshot folded into every emitted
    /// event; the failover chain may answer with a different model, but
    /// the snapshot is a running estimate, not a precise per-call figure.
    primary_model: String,
}

impl AgentLoop {
    pub fn new(services: AgentLoopServices, models: Vec<String>, tier: ModelTier) -> Self {
        let primary = models.first().cloned().unwrap_or_else(|| "default".to_string());
        Self {
            planner: Planner::new(services.provider.clone(), primary.clone()),
            compactor: Compactor::new(Some(services.provider.clone()), primary.clone()),
            model_chain: Mutex::new(ModelChain::new(models)),
            services,
            tier,
            primary_model: primary,
        }
    }

    /// Spawns the loop as a background task, returning an event stream
    /// and an input sender the caller uses to resolve approvals, answer
    /// `ask_human` questions, and cancel.
    pub fn run(
        self: Arc<Self>,
        task: Task,
    ) -> (
        mpsc::UnboundedReceiver<EventEnvelope>,
        mpsc::UnboundedSender<LoopInput>,
    ) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut task = task;
            let mut input_rx = input_rx;
            self.drive(&mut task, Some(&event_tx), Some(&mut input_rx)).await;
            self.run_post_task_learning(&task).await;
        });

        (event_rx, input_tx)
    }

    /// Runs the plan/act/observe cycle to completion. `event_tx`/
    /// `input_rx` are `None` for a delegated child task, which has no
    /// interactive operator attached (see `TaskRunner` impl): approvals
    /// that still require a human after the child's relaxed threshold
    /// are denied outright rather than suspended forever.
    async fn drive(
        &self,
        task: &mut Task,
        event_tx: Option<&mpsc::UnboundedSender<EventEnvelope>>,
        mut input_rx: Option<&mut mpsc::UnboundedReceiver<LoopInput>>,
    ) {
        let mut seq = 0u64;
        self.emit(event_tx, task, &mut seq, Event::TaskCreated { goal: task.goal.clone() });

        let mut active_step_id: Option<String> = None;
        let mut step_messages: Vec<Message> = Vec::new();
        let mut tracker = DiagnosticTracker::new();
        let mut revised_this_step = false;
        let mut failed_steps = 0usize;

        'outer: loop {
            if let Some(reason) = self.services.guardrails.check_budget(&task.counters, &task.guardrails) {
                task.fail(reason.clone());
                self.emit(event_tx, task, &mut seq, Event::TaskFailed { error: reason });
                return;
            }

            let available = self.services.registry.definitions().await;

            if task.plan.is_none() {
                let enrichment = self.build_enrichment_context(task).await;
                let plan = self.planner.create_plan(&task.goal, &available, enrichment.as_deref()).await;
                let step_count = plan.steps.len();
                task.plan = Some(plan);
                let _ = task.transition(TaskStatus::Executing);
                self.emit(event_tx, task, &mut seq, Event::PlanCreated { step_count });
            }

            let next_id = {
                let plan = task.plan.as_ref().unwrap();
                plan.next_eligible_step().map(|s| s.id.clone())
            };

            let step_id = match next_id {
                Some(id) => id,
                None => {
                    let plan = task.plan.as_ref().unwrap();
                    if plan.is_complete() {
                        let summary = task.result.clone().unwrap_or_else(|| "all steps complete".to_string());
                        task.complete(summary.clone());
                        self.emit(event_tx, task, &mut seq, Event::TaskCompleted { result: summary });
                    } else {
                        let reason = "no eligible step and plan incomplete; likely a dependency cycle".to_string();
                        task.fail(reason.clone());
                        self.emit(event_tx, task, &mut seq, Event::TaskFailed { error: reason });
                    }
                    return;
                }
            };

            if active_step_id.as_deref() != Some(step_id.as_str()) {
                active_step_id = Some(step_id.clone());
                step_messages.clear();
                tracker = DiagnosticTracker::new();
                revised_this_step = false;

                let plan = task.plan.as_mut().unwrap();
                let step = plan.steps.iter_mut().find(|s| s.id == step_id).unwrap();
                step.status = StepStatus::InProgress;
                step.attempt_count += 1;
                self.emit(event_tx, task,
                    &mut seq,
                    Event::StepStarted { step_id: step_id.clone(), description: step.description.clone() },
                );
            }

            task.counters.iterations += 1;

            let (description, expected_tools) = {
                let plan = task.plan.as_ref().unwrap();
                let step = plan.steps.iter().find(|s| s.id == step_id).unwrap();
                (step.description.clone(), step.expected_tools.clone())
            };

            let selected_names = select_tools(&description, &expected_tools, &available, self.tier);
            let mut tool_specs: Vec<ToolSpec> = available
                .iter()
                .filter(|d| selected_names.contains(&d.name))
                .map(to_tool_spec)
                .collect();
            tool_specs.extend(delegate_tool_specs());

            let mut messages = vec![Message::system(format!(
                "You are an autonomous coding agent working towards: {}\nCurrent step: {description}",
                task.goal,
            ))];
            messages.extend(step_messages.clone());
            if let Some(advisory) = tracker.advisory() {
                messages.push(Message::system(advisory));
            }
            let before_compaction = messages.len();
            let compaction = self.compactor.compact(&mut messages, task.guardrails.max_tokens as usize).await;
            if !matches!(compaction, CompactionOutcome::Unchanged) {
                self.services.metrics.record_compaction();
                let summarized = before_compaction.saturating_sub(messages.len()) + 1;
                self.emit(event_tx, task, &mut seq, Event::TaskCompacted { messages_summarized: summarized });
                if matches!(compaction, CompactionOutcome::Escalate) {
                    self.emit(event_tx, task, &mut seq, Event::TaskEscalated { reason: "context still over budget after compaction".to_string() });
                }
            }

            let request = ToolGenerationRequest {
                base: GenerationRequest {
                    messages,
                    model: String::new(), // filled in per attempt by call_with_failover
                    temperature: 0.2,
                    max_tokens: 4096,
                },
                tools: tool_specs,
            };

            let generation = match self.call_with_failover(request).await {
                Some(result) => result,
                None => {
                    // Chain exhausted: fail this iteration, not the task
                    // (spec.md §4.7 failure semantics).
                    failed_steps += 1;
                    mark_step_failed(task, &step_id, "all models in the failover chain are unhealthy");
                    self.emit(event_tx, task,
                        &mut seq,
                        Event::StepFailed { step_id: step_id.clone(), error: "LLM failover chain exhausted".to_string() },
                    );
                    active_step_id = None;
                    if failed_steps >= MAX_FAILED_STEPS {
                        let reason = "too many failed steps".to_string();
                        task.fail(reason.clone());
                        self.emit(event_tx, task, &mut seq, Event::TaskFailed { error: reason });
                        return;
                    }
                    continue 'outer;
                }
            };

            if generation.tool_calls.is_empty() {
                if !generation.content.trim().is_empty() {
                    complete_step(task, &step_id, generation.content.clone());
                    self.emit(event_tx, task,
                        &mut seq,
                        Event::StepCompleted { step_id: step_id.clone(), result: generation.content },
                    );
                    active_step_id = None;
                }
                continue 'outer;
            }

            if !generation.content.trim().is_empty() {
                step_messages.push(Message::assistant(generation.content));
            }

            for call in &generation.tool_calls {
                let args: serde_json::Value =
                    serde_json::from_str(&call.arguments).unwrap_or(serde_json::Value::Null);

                if call.name == "task_complete" {
                    let result = args.get("result").and_then(|v| v.as_str()).unwrap_or("done").to_string();
                    task.complete(result.clone());
                    self.emit(event_tx, task, &mut seq, Event::TaskCompleted { result });
                    return;
                }

                if call.name == "step_complete" {
                    let result = args.get("result").and_then(|v| v.as_str()).unwrap_or("done").to_string();
                    complete_step(task, &step_id, result.clone());
                    self.emit(event_tx, task, &mut seq, Event::StepCompleted { step_id: step_id.clone(), result });
                    active_step_id = None;
                    continue 'outer;
                }

                if call.name == "ask_human" {
                    let question = args.get("question").and_then(|v| v.as_str()).unwrap_or("").to_string();
                    let approval = ApprovalRequest::new(task.id.clone(), call.name.clone(), args.clone(), RiskLevel::Low, question);
                    let approval_id = approval.id.clone();
                    task.pending_approval = Some(approval);
                    let _ = task.transition(TaskStatus::WaitingApproval);
                    self.emit(event_tx, task,
                        &mut seq,
                        Event::ApprovalRequested {
                            approval_id: approval_id.clone(),
                            tool_name: call.name.clone(),
                            arguments: args.clone(),
                            risk: RiskLevel::Low,
                        },
                    );

                    let response = wait_for_user_response(&mut input_rx, &call.id).await;
                    let _ = task.transition(TaskStatus::Executing);
                    task.pending_approval = None;
                    self.emit(event_tx, task,
                        &mut seq,
                        Event::ApprovalResolved { approval_id, approved: response.is_some() },
                    );

                    let answer = response.unwrap_or_else(|| "(no response; task cancelled)".to_string());
                    step_messages.push(Message::tool_result(call.id.clone(), answer));
                    continue;
                }

                if let Some(specialist) = specialist_from_tool_name(&call.name) {
                    let goal = args.get("goal").and_then(|v| v.as_str()).unwrap_or(&description).to_string();
                    self.emit(event_tx, task, &mut seq, Event::ToolCallStarted { call_id: call.id.clone(), tool_name: call.name.clone() });
                    let result = self
                        .services
                        .coordinator
                        .delegate(&*task, goal, specialist, &self.services.registry, self)
                        .await;
                    self.emit(event_tx, task,
                        &mut seq,
                        Event::ToolCallCompleted { call_id: call.id.clone(), success: result.success },
                    );
                    let output = if result.success {
                        result.output
                    } else {
                        format!("delegation failed: {}", result.error.unwrap_or_default())
                    };
                    step_messages.push(Message::tool_result(call.id.clone(), output));
                    continue;
                }

                let risk = match self.services.registry.get(&call.name).await {
                    Some(tool) => tool.risk(),
                    None => Guardrails::risk_for(&call.name),
                };
                let decision = self.services.guardrails.evaluate(
                    &task.id,
                    &task.workspace_id,
                    &call.name,
                    &args,
                    risk,
                    &task.guardrails,
                );

                let approved = match decision {
                    Decision::Blocked { reason } => {
                        let typed = TypedToolResult::err(call.id.clone(), reason.clone(), 0);
                        tracker.record(&ToolCall { id: call.id.clone(), name: call.name.clone(), arguments: args.clone() }, &typed);
                        step_messages.push(Message::tool_result(call.id.clone(), format!("blocked: {reason}")));
                        self.emit(event_tx, task, &mut seq, Event::ToolCallCompleted { call_id: call.id.clone(), success: false });
                        continue;
                    }
                    Decision::RequiresApproval { reason, risk } => {
                        let approval = ApprovalRequest::new(task.id.clone(), call.name.clone(), args.clone(), risk, reason);
                        let approval_id = approval.id.clone();
                        task.pending_approval = Some(approval);
                        let _ = task.transition(TaskStatus::WaitingApproval);
                        self.emit(event_tx, task,
                            &mut seq,
                            Event::ApprovalRequested { approval_id: approval_id.clone(), tool_name: call.name.clone(), arguments: args.clone(), risk },
                        );
                        let approved = wait_for_approval(&mut input_rx, &approval_id).await;
                        let _ = task.transition(TaskStatus::Executing);
                        task.pending_approval = None;
                        self.emit(event_tx, task, &mut seq, Event::ApprovalResolved { approval_id, approved });
                        approved
                    }
                    Decision::AutoApprove => true,
                };

                if !approved {
                    let typed = TypedToolResult::err(call.id.clone(), "denied", 0);
                    tracker.record(&ToolCall { id: call.id.clone(), name: call.name.clone(), arguments: args.clone() }, &typed);
                    step_messages.push(Message::tool_result(call.id.clone(), "denied by approval gate".to_string()));
                    self.emit(event_tx, task, &mut seq, Event::ToolCallCompleted { call_id: call.id.clone(), success: false });
                    continue;
                }

                self.emit(event_tx, task, &mut seq, Event::ToolCallStarted { call_id: call.id.clone(), tool_name: call.name.clone() });
                task.counters.tool_calls += 1;
                let ctx = ToolContext::default().with_sandbox(self.services.registry_sandbox());
                let start = Instant::now();
                let registry_result = self
                    .services
                    .registry
                    .execute(&call.name, args.clone(), &ctx)
                    .await
                    .unwrap_or_else(|| crate::tools::ToolResult { output: format!("unknown tool: {}", call.name), is_error: true });
                let elapsed = start.elapsed().as_millis() as u64;
                self.services.metrics.record_tool_execution(start.elapsed());

                let typed = if registry_result.is_error {
                    TypedToolResult::err(call.id.clone(), registry_result.output.clone(), elapsed)
                } else {
                    TypedToolResult::ok(call.id.clone(), registry_result.output.clone(), elapsed)
                };
                tracker.record(&ToolCall { id: call.id.clone(), name: call.name.clone(), arguments: args.clone() }, &typed);
                self.emit(event_tx, task,
                    &mut seq,
                    Event::ToolCallCompleted { call_id: call.id.clone(), success: !registry_result.is_error },
                );
                step_messages.push(Message::tool_result(call.id.clone(), registry_result.output));
            }

            if tracker.should_stop_and_diagnose() {
                if !revised_this_step {
                    revised_this_step = true;
                    let _ = task.transition(TaskStatus::Reflecting);
                    let observations = tracker.advisory().unwrap_or_default();
                    let plan = task.plan.as_ref().unwrap();
                    let revised = self.planner.revise_plan(plan, &observations, &available).await;
                    let revision = revised.revision_count;
                    task.plan = Some(revised);
                    let step_count = task.plan.as_ref().unwrap().steps.len();
                    self.emit(event_tx, task, &mut seq, Event::PlanRevised { step_count, revision });
                    let _ = task.transition(TaskStatus::Executing);
                    tracker = DiagnosticTracker::new();
                    active_step_id = None;
                } else {
                    failed_steps += 1;
                    mark_step_failed(task, &step_id, "repeated tool failures with no progress");
                    self.emit(event_tx, task,
                        &mut seq,
                        Event::StepFailed { step_id: step_id.clone(), error: "repeated tool failures".to_string() },
                    );
                    active_step_id = None;
                    if failed_steps >= MAX_FAILED_STEPS {
                        let reason = "too many failed steps".to_string();
                        task.fail(reason.clone());
                        self.emit(event_tx, task, &mut seq, Event::TaskFailed { error: reason });
                        return;
                    }
                }
            }
        }
    }

    /// Tries each eligible model in the failover chain in order, retrying
    /// on failure until the chain is exhausted. `None` means every model
    /// is currently unhealthy or failed this call.
    async fn call_with_failover(
        &self,
        mut request: ToolGenerationRequest,
    ) -> Option<crate::llm::ToolGenerationResult> {
        loop {
            let model = {
                let chain = self.model_chain.lock().await;
                chain.next_eligible().map(str::to_string)
            };
            let Some(model) = model else { return None };

            request.base.model = model.clone();
            match self.services.provider.generate_with_tools(request.clone()).await {
                Ok(result) => {
                    self.model_chain.lock().await.record_success(&model);
                    let prompt_tokens = crate::context::compactor::estimate_tokens(&request.base.messages) as u64;
                    let completion_tokens = (result.content.chars().count() / 4) as u64;
                    self.services.metrics.record_llm_call(prompt_tokens, completion_tokens);
                    return Some(result);
                }
                Err(e) => {
                    tracing::warn!(model = %model, error = %e, "loop: model call failed, trying next in chain");
                    self.model_chain.lock().await.record_failure(&model);
                    self.services.metrics.record_failover();
                }
            }
        }
    }

    /// Builds the planning-prompt section from past lessons, the user's
    /// learned persona, and memory-graph context, each best-effort and
    /// skipped entirely when its collaborator isn't configured.
    async fn build_enrichment_context(&self, task: &Task) -> Option<String> {
        let mut sections = Vec::new();

        if let Some(learner) = &self.services.learner {
            let lessons = learner.enrich_context(&task.workspace_id, &task.goal, 5).await;
            if !lessons.is_empty() {
                sections.push(lessons);
            }
        }

        if let Some(persona) = &self.services.persona {
            let formatted = persona.format_for_prompt(&task.user_id).await;
            if !formatted.is_empty() {
                sections.push(formatted);
            }
        }

        if let Some(graph) = &self.services.memory_graph {
            let seeds: Vec<String> = task.goal.split_whitespace().map(str::to_string).collect();
            let formatted = graph.format_for_prompt(&task.workspace_id, &seeds).await;
            if !formatted.is_empty() {
                sections.push(formatted);
            }
        }

        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }

    /// Extracts lessons from a finished top-level task, once it has
    /// reached a terminal state. A no-op when no learner is configured.
    async fn run_post_task_learning(&self, task: &Task) {
        if let Some(learner) = &self.services.learner {
            learner.extract_lessons(task).await;
        }
    }
}

impl AgentLoopServices {
    fn registry_sandbox(&self) -> std::path::PathBuf {
        std::env::current_dir().unwrap_or_else(|_| std::path::PathBuf::from("."))
    }
}

/// Delegated child tasks have no interactive operator attached: an
/// AgentLoop runs its own child loop through `drive` with `event_tx`/
/// `input_rx` both `None`, and folds the resulting `Task` into a
/// `SubAgentResult` for the Coordinator.
#[async_trait]
impl TaskRunner for AgentLoop {
    async fn run(&self, spec: ChildTaskSpec) -> SubAgentResult {
        let guardrails = GuardrailConfig {
            max_iterations: 15,
            max_tool_calls: 30,
            max_tokens: spec.token_budget,
            auto_approve_risk: spec.auto_approve_risk,
            always_approve: Vec::new(),
            extra_blocked_patterns: Vec::new(),
        };
        let mut child_task = Task::new("system", "delegated", spec.goal.clone(), guardrails);
        child_task.parent_task_id = Some(spec.parent_task_id.clone());

        let child_services = AgentLoopServices {
            provider: self.services.provider.clone(),
            registry: spec.registry,
            guardrails: self.services.guardrails.clone(),
            coordinator: self.services.coordinator.clone(),
            persistence: self.services.persistence.clone(),
            event_bus: self.services.event_bus.clone(),
            metrics: self.services.metrics.clone(),
            // Delegated sub-agents work towards a parent's goal; lesson
            // extraction and persona/graph enrichment stay scoped to the
            // top-level task that owns them.
            learner: None,
            persona: None,
            memory_graph: None,
        };
        let models = {
            let chain = self.model_chain.lock().await;
            chain.primary().map(|m| vec![m.to_string()]).unwrap_or_default()
        };
        let child_loop = AgentLoop::new(child_services, models, self.tier);

        let deadline = tokio::time::Instant::now() + spec.wall_time;
        let drive_future = child_loop.drive(&mut child_task, None, None);
        if tokio::time::timeout_at(deadline, drive_future).await.is_err() {
            return SubAgentResult {
                specialist: spec.specialist.name().to_string(),
                success: false,
                output: String::new(),
                error: Some(format!("child task exceeded its wall-time budget of {:?}", spec.wall_time)),
            };
        }

        match child_task.status {
            TaskStatus::Complete => SubAgentResult {
                specialist: spec.specialist.name().to_string(),
                success: true,
                output: child_task.result.unwrap_or_default(),
                error: None,
            },
            _ => SubAgentResult {
                specialist: spec.specialist.name().to_string(),
                success: false,
                output: String::new(),
                error: Some(child_task.error.unwrap_or_else(|| "child task did not complete".to_string())),
            },
        }
    }
}

impl AgentLoop {
    /// Emits one event for a transition that just happened: sends it to
    /// the run's own subscriber (if any), publishes it on the shared bus
    /// for workspace/session watchers and late subscribers, and upserts
    /// the task row (spec.md §4.9: every state-changing transition issues
    /// a row update).
    fn emit(
        &self,
        event_tx: Option<&mpsc::UnboundedSender<EventEnvelope>>,
        task: &Task,
        seq: &mut u64,
        event: Event,
    ) {
        *seq += 1;
        let envelope = EventEnvelope::new(&task.id, *seq, event);

        if let Some(tx) = event_tx {
            let _ = tx.send(envelope.clone());
        }

        self.services.event_bus.publish(
            &task.id,
            &task.workspace_id,
            task.conversation_id.as_deref(),
            envelope,
        );

        if let Err(e) = TaskStore::new(&self.services.persistence).upsert(task) {
            tracing::warn!(task_id = %task.id, error = %e, "loop: failed to persist task row on transition");
        }

        *seq += 1;
        let metrics_envelope = EventEnvelope::new(
            &task.id,
            *seq,
            self.services.metrics.snapshot(&self.primary_model).to_event(),
        );
        if let Some(tx) = event_tx {
            let _ = tx.send(metrics_envelope.clone());
        }
        self.services.event_bus.publish(
            &task.id,
            &task.workspace_id,
            task.conversation_id.as_deref(),
            metrics_envelope,
        );
    }
}

fn to_tool_spec(def: &ToolDefinition) -> ToolSpec {
    ToolSpec {
        name: def.name.clone(),
        description: def.description.clone(),
        parameters_schema: def.parameters_schema.clone(),
    }
}

/// Delegation is a loop-level capability, not a registered `Tool`, so its
/// schemas are synthesized here rather than sourced from the registry.
fn delegate_tool_specs() -> Vec<ToolSpec> {
    [
        SpecialistKind::Researcher,
        SpecialistKind::Coder,
        SpecialistKind::Analyst,
        SpecialistKind::Reviewer,
        SpecialistKind::Explorer,
    ]
    .iter()
    .map(|kind| ToolSpec {
        name: format!("delegate_{}", kind.name()),
        description: kind.persona_preamble().to_string(),
        parameters_schema: serde_json::json!({
            "type": "object",
            "properties": { "goal": { "type": "string" } },
            "required": ["goal"],
            "additionalProperties": false
        }),
    })
    .collect()
}

fn specialist_from_tool_name(name: &str) -> Option<SpecialistKind> {
    match name.strip_prefix("delegate_")? {
        "researcher" => Some(SpecialistKind::Researcher),
        "coder" => Some(SpecialistKind::Coder),
        "analyst" => Some(SpecialistKind::Analyst),
        "reviewer" => Some(SpecialistKind::Reviewer),
        "explorer" => Some(SpecialistKind::Explorer),
        _ => None,
    }
}

fn complete_step(task: &mut Task, step_id: &str, result: String) {
    if let Some(plan) = task.plan.as_mut() {
        if let Some(step) = plan.steps.iter_mut().find(|s| s.id == step_id) {
            step.status = StepStatus::Complete;
            step.result = Some(result);
        }
    }
}

fn mark_step_failed(task: &mut Task, step_id: &str, error: &str) {
    if let Some(plan) = task.plan.as_mut() {
        if let Some(step) = plan.steps.iter_mut().find(|s| s.id == step_id) {
            step.status = StepStatus::Failed;
            step.error = Some(error.to_string());
        }
    }
}

async fn wait_for_approval(
    input_rx: &mut Option<&mut mpsc::UnboundedReceiver<LoopInput>>,
    approval_id: &str,
) -> bool {
    let Some(rx) = input_rx.as_deref_mut() else {
        // No interactive operator attached (delegated child): deny
        // rather than hang.
        return false;
    };
    let deadline = tokio::time::Instant::now() + APPROVAL_TIMEOUT;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(LoopInput::ApprovalResolved { approval_id: id, approved })) if id == approval_id => {
                return approved;
            }
            Ok(Some(LoopInput::Cancel)) | Ok(None) | Err(_) => return false,
            Ok(Some(_)) => continue,
        }
    }
}

async fn wait_for_user_response(
    input_rx: &mut Option<&mut mpsc::UnboundedReceiver<LoopInput>>,
    tool_call_id: &str,
) -> Option<String> {
    let rx = input_rx.as_deref_mut()?;
    let deadline = tokio::time::Instant::now() + APPROVAL_TIMEOUT;
    loop {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(LoopInput::UserResponse { tool_call_id: id, response })) if id == tool_call_id => {
                return Some(response);
            }
            Ok(Some(LoopInput::Cancel)) | Ok(None) | Err(_) => return None,
            Ok(Some(_)) => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::guardrails::ApprovalMemory;
    use crate::llm::{LlmResult, ToolGenerationResult};
    use crate::types::tool::RiskLevel;

    /// A scripted provider: returns a fixed sequence of tool-generation
    /// results, one per call, then repeats the last forever.
    struct ScriptedProvider {
        script: Vec<ToolGenerationResult>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn stream(&self, _request: GenerationRequest) -> LlmResult<mpsc::Receiver<crate::llm::StreamChunk>> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }

        async fn generate_with_tools(&self, _request: ToolGenerationRequest) -> LlmResult<ToolGenerationResult> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.script.get(i).cloned().unwrap_or_else(|| self.script.last().unwrap().clone()))
        }
    }

    fn guardrails_config() -> GuardrailConfig {
        GuardrailConfig {
            max_iterations: 10,
            max_tool_calls: 10,
            max_tokens: 100_000,
            auto_approve_risk: RiskLevel::High,
            always_approve: Vec::new(),
            extra_blocked_patterns: Vec::new(),
        }
    }

    fn services(provider: Arc<dyn LlmProvider>) -> AgentLoopServices {
        AgentLoopServices {
            provider,
            registry: ToolRegistry::new(),
            guardrails: Arc::new(Guardrails::new(Arc::new(ApprovalMemory::new(None)))),
            coordinator: Arc::new(Coordinator::new()),
            persistence: Arc::new(crate::storage::Database::open_in_memory().unwrap()),
            event_bus: Arc::new(EventBus::new(300, Duration::from_secs(3600))),
            metrics: Arc::new(MetricsCollector::new()),
            learner: None,
            persona: None,
            memory_graph: None,
        }
    }

    #[tokio::test]
    async fn plan_then_task_complete_reaches_complete_status() {
        let provider = Arc::new(ScriptedProvider {
            script: vec![
                // Planner's one-shot plan request.
                ToolGenerationResult { content: r#"{"steps":[{"id":"s1","description":"do it"}],"reasoning":"r"}"#.to_string(), tool_calls: Vec::new() },
                // Step round calls task_complete directly.
                ToolGenerationResult {
                    content: String::new(),
                    tool_calls: vec![crate::llm::ToolCallRequest {
                        id: "c1".to_string(),
                        name: "task_complete".to_string(),
                        arguments: json!({"result": "all done"}).to_string(),
                    }],
                },
            ],
            calls: AtomicUsize::new(0),
        });

        let agent_loop = AgentLoop::new(services(provider), vec!["test-model".to_string()], ModelTier::Local);
        let mut task = Task::new("u1", "w1", "ship the feature", guardrails_config());
        agent_loop.drive(&mut task, None, None).await;

        assert_eq!(task.status, TaskStatus::Complete);
        assert_eq!(task.result.as_deref(), Some("all done"));
    }

    #[tokio::test]
    async fn free_text_response_completes_single_step_plan() {
        let provider = Arc::new(ScriptedProvider {
            script: vec![
                ToolGenerationResult { content: r#"{"steps":[{"id":"s1","description":"explain it"}],"reasoning":"r"}"#.to_string(), tool_calls: Vec::new() },
                ToolGenerationResult { content: "here is the explanation".to_string(), tool_calls: Vec::new() },
            ],
            calls: AtomicUsize::new(0),
        });

        let agent_loop = AgentLoop::new(services(provider), vec!["test-model".to_string()], ModelTier::Local);
        let mut task = Task::new("u1", "w1", "explain the bug", guardrails_config());
        agent_loop.drive(&mut task, None, None).await;

        assert_eq!(task.status, TaskStatus::Complete);
    }

    #[tokio::test]
    async fn completed_task_is_persisted_and_published_to_the_event_bus() {
        let provider = Arc::new(ScriptedProvider {
            script: vec![
                ToolGenerationResult { content: r#"{"steps":[{"id":"s1","description":"do it"}],"reasoning":"r"}"#.to_string(), tool_calls: Vec::new() },
                ToolGenerationResult {
                    content: String::new(),
                    tool_calls: vec![crate::llm::ToolCallRequest {
                        id: "c1".to_string(),
                        name: "task_complete".to_string(),
                        arguments: json!({"result": "all done"}).to_string(),
                    }],
                },
            ],
            calls: AtomicUsize::new(0),
        });

        let persistence = Arc::new(crate::storage::Database::open_in_memory().unwrap());
        let event_bus = Arc::new(EventBus::new(300, Duration::from_secs(3600)));
        let mut services = services(provider);
        services.persistence = persistence.clone();
        services.event_bus = event_bus.clone();

        let agent_loop = AgentLoop::new(services, vec!["test-model".to_string()], ModelTier::Local);
        let mut task = Task::new("u1", "w1", "ship the feature", guardrails_config());
        let task_id = task.id.clone();
        agent_loop.drive(&mut task, None, None).await;

        let stored = TaskStore::new(&persistence).get(&task_id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Complete);

        let replay = event_bus.subscribe_task(&task_id);
        assert!(replay.backlog.iter().any(|e| matches!(e.event, Event::TaskCompleted { .. })));
    }

    #[tokio::test]
    async fn exhausted_budget_fails_task_before_any_model_call() {
        let provider = Arc::new(ScriptedProvider { script: Vec::new(), calls: AtomicUsize::new(0) });
        let agent_loop = AgentLoop::new(services(provider), vec!["test-model".to_string()], ModelTier::Local);
        let mut cfg = guardrails_config();
        cfg.max_iterations = 0;
        let mut task = Task::new("u1", "w1", "anything", cfg);
        agent_loop.drive(&mut task, None, None).await;

        assert_eq!(task.status, TaskStatus::Failed);
    }
}
