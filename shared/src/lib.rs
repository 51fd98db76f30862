use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use uuid::Uuid;

pub type PrincipalId = Uuid;
pub type OrganizationId = Uuid;

/// Principal recorded on decisions the engine makes on its own behalf
/// (auto-approved steps, approve-on-timeout escalations).
pub const SYSTEM_PRINCIPAL: PrincipalId = Uuid::nil();

// ===== Roles =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Manager,
    Finance,
    Legal,
    HumanResources,
    Approver,
    Member,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Finance => "finance",
            Self::Legal => "legal",
            Self::HumanResources => "human_resources",
            Self::Approver => "approver",
            Self::Member => "member",
        }
    }

    /// Elevated roles may mark default templates and cancel other people's requests.
    pub fn is_elevated(&self) -> bool {
        matches!(self, Self::Admin | Self::Manager)
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Self::Admin),
            "manager" => Ok(Self::Manager),
            "finance" => Ok(Self::Finance),
            "legal" => Ok(Self::Legal),
            "human_resources" => Ok(Self::HumanResources),
            "approver" => Ok(Self::Approver),
            "member" => Ok(Self::Member),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

// ===== Context =====

/// A typed attribute of the business object under approval.
///
/// `Absent` only has meaning as a comparison value in a [`Condition`]: it
/// matches a field that the context does not carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ContextValue {
    String(String),
    Number(Decimal),
    Boolean(bool),
    Date(DateTime<Utc>),
    Null,
    List(Vec<ContextValue>),
    Absent,
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        Self::Number(Decimal::from(value))
    }
}

impl From<Decimal> for ContextValue {
    fn from(value: Decimal) -> Self {
        Self::Number(value)
    }
}

impl From<DateTime<Utc>> for ContextValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

impl<T: Into<ContextValue>> From<Vec<T>> for ContextValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// Attributes of the request keyed by field path (`"amount"`, `"vendor.country"`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    fields: BTreeMap<String, ContextValue>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, value: impl Into<ContextValue>) -> Self {
        self.insert(path, value);
        self
    }

    pub fn insert(&mut self, path: &str, value: impl Into<ContextValue>) {
        self.fields.insert(path.to_string(), value.into());
    }

    pub fn get(&self, path: &str) -> Option<&ContextValue> {
        match self.fields.get(path) {
            Some(ContextValue::Absent) | None => None,
            Some(value) => Some(value),
        }
    }

    /// Build a context from a loosely typed JSON payload. Nested objects are
    /// flattened into dot-separated paths; strings are never coerced.
    pub fn from_json(payload: &serde_json::Value) -> Self {
        let mut context = Self::new();
        if let serde_json::Value::Object(map) = payload {
            for (key, value) in map {
                context.flatten(key, value);
            }
        }
        context
    }

    fn flatten(&mut self, path: &str, value: &serde_json::Value) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, nested) in map {
                    self.flatten(&format!("{}.{}", path, key), nested);
                }
            }
            other => {
                self.fields.insert(path.to_string(), json_to_value(other));
            }
        }
    }
}

fn json_to_value(value: &serde_json::Value) -> ContextValue {
    match value {
        serde_json::Value::Null => ContextValue::Null,
        serde_json::Value::Bool(b) => ContextValue::Boolean(*b),
        serde_json::Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .map(ContextValue::Number)
                .unwrap_or(ContextValue::Null)
        }
        serde_json::Value::String(s) => ContextValue::String(s.clone()),
        serde_json::Value::Array(items) => ContextValue::List(items.iter().map(json_to_value).collect()),
        // Objects nested inside lists carry no path of their own
        serde_json::Value::Object(_) => ContextValue::Null,
    }
}

// ===== Conditions =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    In,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::NotEquals => "not_equals",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::Contains => "contains",
            Self::In => "in",
        }
    }
}

/// Predicate gating whether a step is part of an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Field path into the context
    pub field: String,
    pub operator: ConditionOperator,
    pub value: ContextValue,
}

impl Condition {
    pub fn new(field: &str, operator: ConditionOperator, value: impl Into<ContextValue>) -> Self {
        Self {
            field: field.to_string(),
            operator,
            value: value.into(),
        }
    }

    pub fn equals(field: &str, value: impl Into<ContextValue>) -> Self {
        Self::new(field, ConditionOperator::Equals, value)
    }

    pub fn not_equals(field: &str, value: impl Into<ContextValue>) -> Self {
        Self::new(field, ConditionOperator::NotEquals, value)
    }

    pub fn greater_than(field: &str, value: impl Into<ContextValue>) -> Self {
        Self::new(field, ConditionOperator::GreaterThan, value)
    }

    pub fn less_than(field: &str, value: impl Into<ContextValue>) -> Self {
        Self::new(field, ConditionOperator::LessThan, value)
    }

    pub fn contains(field: &str, value: impl Into<ContextValue>) -> Self {
        Self::new(field, ConditionOperator::Contains, value)
    }

    pub fn in_list(field: &str, values: Vec<ContextValue>) -> Self {
        Self::new(field, ConditionOperator::In, ContextValue::List(values))
    }

    pub fn is_absent(field: &str) -> Self {
        Self::new(field, ConditionOperator::Equals, ContextValue::Absent)
    }
}

// ===== Templates =====

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    #[default]
    EscalateReject,
    AutoApproveOnTimeout,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionPolicy {
    #[default]
    AnyReject,
    UnanimousReject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub step_number: u32,
    pub name: String,
    #[serde(default)]
    pub approver_roles: BTreeSet<Role>,
    #[serde(default)]
    pub approver_ids: BTreeSet<PrincipalId>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub is_parallel: bool,
    #[serde(default)]
    pub required_approvals: Option<u32>,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub timeout_hours: Option<u32>,
    #[serde(default)]
    pub on_timeout: TimeoutPolicy,
    #[serde(default)]
    pub rejection_policy: RejectionPolicy,
}

impl StepDefinition {
    pub fn new(step_number: u32, name: &str) -> Self {
        Self {
            step_number,
            name: name.to_string(),
            approver_roles: BTreeSet::new(),
            approver_ids: BTreeSet::new(),
            conditions: Vec::new(),
            is_parallel: false,
            required_approvals: None,
            auto_approve: false,
            timeout_hours: None,
            on_timeout: TimeoutPolicy::default(),
            rejection_policy: RejectionPolicy::default(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.approver_roles.insert(role);
        self
    }

    pub fn with_approvers(mut self, approvers: impl IntoIterator<Item = PrincipalId>) -> Self {
        self.approver_ids.extend(approvers);
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn parallel(mut self) -> Self {
        self.is_parallel = true;
        self
    }

    pub fn requiring(mut self, approvals: u32) -> Self {
        self.required_approvals = Some(approvals);
        self
    }

    pub fn auto_approved(mut self) -> Self {
        self.auto_approve = true;
        self
    }

    pub fn with_timeout(mut self, hours: u32, policy: TimeoutPolicy) -> Self {
        self.timeout_hours = Some(hours);
        self.on_timeout = policy;
        self
    }

    pub fn unanimous_reject(mut self) -> Self {
        self.rejection_policy = RejectionPolicy::UnanimousReject;
        self
    }

    pub fn has_approver_pool(&self) -> bool {
        !self.approver_roles.is_empty() || !self.approver_ids.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub organization_id: OrganizationId,
    pub name: String,
    pub category: String,
    pub description: Option<String>,
    pub steps: Vec<StepDefinition>,
    pub is_active: bool,
    pub is_default: bool,
    pub created_by: PrincipalId,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

// ===== Instances =====

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "approval_instance_status", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    InProgress,
    Approved,
    Rejected,
    Expired,
    Cancelled,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Expired | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Active,
    Approved,
    Rejected,
    Expired,
    Cancelled,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Expired | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    Approve,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub approver_id: PrincipalId,
    pub outcome: DecisionOutcome,
    pub comment: Option<String>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    pub step_number: u32,
    pub name: String,
    pub status: StepStatus,
    pub activated_at: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Snapshotted from the directory when the instance was created
    pub eligible_approvers: BTreeSet<PrincipalId>,
    pub required_approvals: u32,
    pub decisions: Vec<Decision>,
}

impl StepExecution {
    pub fn decision_of(&self, approver_id: PrincipalId) -> Option<&Decision> {
        self.decisions.iter().find(|d| d.approver_id == approver_id)
    }

    pub fn is_eligible(&self, approver_id: PrincipalId) -> bool {
        self.eligible_approvers.contains(&approver_id)
    }

    pub fn approvals(&self) -> usize {
        self.decisions.iter().filter(|d| d.outcome == DecisionOutcome::Approve).count()
    }

    pub fn rejections(&self) -> usize {
        self.decisions.iter().filter(|d| d.outcome == DecisionOutcome::Reject).count()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instance {
    pub id: Uuid,
    pub organization_id: OrganizationId,
    pub template_id: Uuid,
    pub template_name: String,
    pub category: String,
    pub requester_id: PrincipalId,
    pub status: InstanceStatus,
    /// Index into `executions` of the step being (or last) worked on
    pub current_step: usize,
    pub context: Context,
    /// Applicable step definitions, filtered by condition at creation
    pub steps: Vec<StepDefinition>,
    pub executions: Vec<StepExecution>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<PrincipalId>,
    pub version: u64,
}

impl Instance {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn active_execution(&self) -> Option<&StepExecution> {
        self.executions.iter().find(|e| e.status == StepStatus::Active)
    }

    pub fn execution(&self, step_number: u32) -> Option<&StepExecution> {
        self.executions.iter().find(|e| e.step_number == step_number)
    }

    pub fn definition(&self, step_number: u32) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.step_number == step_number)
    }

    /// Eligible approvers of the active step who have not decided yet
    pub fn pending_approvers(&self) -> BTreeSet<PrincipalId> {
        match self.active_execution() {
            Some(execution) => execution
                .eligible_approvers
                .iter()
                .filter(|id| execution.decision_of(**id).is_none())
                .copied()
                .collect(),
            None => BTreeSet::new(),
        }
    }
}

// ===== Events =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEventKind {
    InstanceCreated,
    StepActivated,
    DecisionRecorded,
    StepResolved,
    InstanceResolved,
}

impl WorkflowEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InstanceCreated => "instance_created",
            Self::StepActivated => "step_activated",
            Self::DecisionRecorded => "decision_recorded",
            Self::StepResolved => "step_resolved",
            Self::InstanceResolved => "instance_resolved",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    InProgress,
    Approved,
    Rejected,
    Expired,
    Cancelled,
}

impl From<StepStatus> for EventOutcome {
    fn from(status: StepStatus) -> Self {
        match status {
            StepStatus::Pending | StepStatus::Active => Self::InProgress,
            StepStatus::Approved => Self::Approved,
            StepStatus::Rejected => Self::Rejected,
            StepStatus::Expired => Self::Expired,
            StepStatus::Cancelled => Self::Cancelled,
        }
    }
}

impl From<InstanceStatus> for EventOutcome {
    fn from(status: InstanceStatus) -> Self {
        match status {
            InstanceStatus::Pending | InstanceStatus::InProgress => Self::InProgress,
            InstanceStatus::Approved => Self::Approved,
            InstanceStatus::Rejected => Self::Rejected,
            InstanceStatus::Expired => Self::Expired,
            InstanceStatus::Cancelled => Self::Cancelled,
        }
    }
}

impl From<DecisionOutcome> for EventOutcome {
    fn from(outcome: DecisionOutcome) -> Self {
        match outcome {
            DecisionOutcome::Approve => Self::Approved,
            DecisionOutcome::Reject => Self::Rejected,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub id: Uuid,
    pub kind: WorkflowEventKind,
    pub instance_id: Uuid,
    pub organization_id: OrganizationId,
    pub step_number: Option<u32>,
    pub outcome: EventOutcome,
    /// Users the notification collaborator should reach
    pub recipients: BTreeSet<PrincipalId>,
    pub occurred_at: DateTime<Utc>,
}
