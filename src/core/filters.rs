/*
 * The subject filter language: leaf conditions on a subject (id, modality,
 * filename entity, participant attribute, iEEG channel or electrode attribute)
 * combined with AND, OR and NOT into a tree.
 *
 * Expressions serialize to the JSON shape used by saved filter presets: every
 * node is an object with a `type` field, groups are
 * `{"type": "logical_operation", "operator": "AND", "conditions": [...]}`.
 */
use serde::de::{self, Deserializer};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

use super::entity_registry::EntityRegistry;
use super::filter_tree::NodeId;
use super::models::{Dataset, Subject};
use super::tsv::{TsvRow, participant_id};

const LOGICAL_OPERATION_TAG: &str = "logical_operation";

#[derive(Debug)]
pub enum FilterError {
    NotSimple,
    InvalidExpression(String),
    InvalidNode(NodeId),
    NotAGroup(NodeId),
    CannotPasteIntoSelf,
    EmptyClipboard,
    Serde(serde_json::Error),
}

impl From<serde_json::Error> for FilterError {
    fn from(err: serde_json::Error) -> Self {
        FilterError::Serde(err)
    }
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::NotSimple => write!(
                f,
                "Filter cannot be shown in simple mode (it uses OR, NOT or nested groups)"
            ),
            FilterError::InvalidExpression(msg) => write!(f, "Invalid filter expression: {msg}"),
            FilterError::InvalidNode(id) => write!(f, "No filter node with id {id:?}"),
            FilterError::NotAGroup(id) => write!(f, "Filter node {id:?} is not a group"),
            FilterError::CannotPasteIntoSelf => {
                write!(f, "Cannot paste a cut node into itself or its descendants")
            }
            FilterError::EmptyClipboard => write!(f, "Nothing to paste"),
            FilterError::Serde(e) => write!(f, "Serialization/Deserialization error: {e}"),
        }
    }
}

impl std::error::Error for FilterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FilterError::Serde(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FilterError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogicalOperator {
    #[default]
    #[serde(rename = "AND", alias = "and")]
    And,
    #[serde(rename = "OR", alias = "or")]
    Or,
    #[serde(rename = "NOT", alias = "not")]
    Not,
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LogicalOperator::And => "AND",
            LogicalOperator::Or => "OR",
            LogicalOperator::Not => "NOT",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOperator {
    #[default]
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
}

impl fmt::Display for CompareOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CompareOperator::Equals => "equals",
            CompareOperator::NotEquals => "not equals",
            CompareOperator::Contains => "contains",
            CompareOperator::GreaterThan => "greater than",
            CompareOperator::LessThan => "less than",
        };
        f.write_str(text)
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|n| n.is_finite())
}

/*
 * Compares an observed value against the condition's value. Both sides are
 * trimmed. `contains` is a substring test; the other operators compare
 * numerically when both sides parse as finite numbers and lexically otherwise.
 */
pub fn compare_values(actual: &str, operator: CompareOperator, expected: &str) -> bool {
    let actual = actual.trim();
    let expected = expected.trim();
    let ordering = || match (parse_number(actual), parse_number(expected)) {
        (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
        _ => actual.cmp(expected),
    };
    match operator {
        CompareOperator::Contains => actual.contains(expected),
        CompareOperator::Equals => ordering() == Ordering::Equal,
        CompareOperator::NotEquals => ordering() != Ordering::Equal,
        CompareOperator::GreaterThan => ordering() == Ordering::Greater,
        CompareOperator::LessThan => ordering() == Ordering::Less,
    }
}

/* Accepts a JSON string, number or boolean where a value is expected. */
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(de::Error::custom(format!(
            "expected a string or number, found {other}"
        ))),
    }
}

/*
 * A leaf test on one subject. A condition whose key or value is empty is
 * unconstrained and matches every subject.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    SubjectId {
        #[serde(default)]
        subject_id: String,
    },
    Modality {
        #[serde(default)]
        modality: String,
    },
    Entity {
        #[serde(default)]
        entity_code: String,
        #[serde(default)]
        operator: CompareOperator,
        #[serde(default, deserialize_with = "string_or_number")]
        value: String,
    },
    ParticipantAttribute {
        #[serde(default)]
        attribute_name: String,
        #[serde(default)]
        operator: CompareOperator,
        #[serde(default, deserialize_with = "string_or_number")]
        value: String,
    },
    ChannelAttribute {
        #[serde(default)]
        attribute_name: String,
        #[serde(default)]
        operator: CompareOperator,
        #[serde(default, deserialize_with = "string_or_number")]
        value: String,
    },
    ElectrodeAttribute {
        #[serde(default)]
        attribute_name: String,
        #[serde(default)]
        operator: CompareOperator,
        #[serde(default, deserialize_with = "string_or_number")]
        value: String,
    },
}

impl Condition {
    pub fn subject_id(id: impl Into<String>) -> Self {
        Condition::SubjectId {
            subject_id: id.into(),
        }
    }

    pub fn modality(modality: impl Into<String>) -> Self {
        Condition::Modality {
            modality: modality.into(),
        }
    }

    pub fn entity(
        code: impl Into<String>,
        operator: CompareOperator,
        value: impl Into<String>,
    ) -> Self {
        Condition::Entity {
            entity_code: code.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn participant(
        attribute: impl Into<String>,
        operator: CompareOperator,
        value: impl Into<String>,
    ) -> Self {
        Condition::ParticipantAttribute {
            attribute_name: attribute.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn channel(
        attribute: impl Into<String>,
        operator: CompareOperator,
        value: impl Into<String>,
    ) -> Self {
        Condition::ChannelAttribute {
            attribute_name: attribute.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn electrode(
        attribute: impl Into<String>,
        operator: CompareOperator,
        value: impl Into<String>,
    ) -> Self {
        Condition::ElectrodeAttribute {
            attribute_name: attribute.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn evaluate(&self, subject: &Subject) -> bool {
        match self {
            Condition::SubjectId { subject_id } => {
                subject_id.trim().is_empty() || participant_id(subject_id) == subject.subject_id
            }
            Condition::Modality { modality } => {
                modality.trim().is_empty()
                    || subject
                        .all_files()
                        .any(|f| f.modality.as_deref() == Some(modality.trim()))
            }
            Condition::Entity {
                entity_code,
                operator,
                value,
            } => {
                if entity_code.is_empty() || value.trim().is_empty() {
                    return true;
                }
                if entity_code == "ses" {
                    return subject
                        .session_ids()
                        .any(|id| compare_values(id, *operator, value));
                }
                subject.all_files().any(|f| {
                    f.entities
                        .get(entity_code)
                        .is_some_and(|v| compare_values(v, *operator, value))
                })
            }
            Condition::ParticipantAttribute {
                attribute_name,
                operator,
                value,
            } => {
                if attribute_name.is_empty() || value.trim().is_empty() {
                    return true;
                }
                subject
                    .metadata
                    .get(attribute_name)
                    .is_some_and(|v| compare_values(v, *operator, value))
            }
            Condition::ChannelAttribute {
                attribute_name,
                operator,
                value,
            } => {
                if attribute_name.is_empty() || value.trim().is_empty() {
                    return true;
                }
                subject.ieeg_data.as_ref().is_some_and(|ieeg| {
                    any_row_matches(ieeg.channel_rows(), attribute_name, *operator, value)
                })
            }
            Condition::ElectrodeAttribute {
                attribute_name,
                operator,
                value,
            } => {
                if attribute_name.is_empty() || value.trim().is_empty() {
                    return true;
                }
                subject.ieeg_data.as_ref().is_some_and(|ieeg| {
                    any_row_matches(ieeg.electrode_rows(), attribute_name, *operator, value)
                })
            }
        }
    }

    /* A one-line label such as `Task equals rest`. */
    pub fn describe(&self, registry: &EntityRegistry) -> String {
        match self {
            Condition::SubjectId { subject_id } => format!("Subject equals {subject_id}"),
            Condition::Modality { modality } => format!("Modality equals {modality}"),
            Condition::Entity {
                entity_code,
                operator,
                value,
            } => format!("{} {operator} {value}", registry.full_name(entity_code)),
            Condition::ParticipantAttribute {
                attribute_name,
                operator,
                value,
            } => format!("Participant {attribute_name} {operator} {value}"),
            Condition::ChannelAttribute {
                attribute_name,
                operator,
                value,
            } => format!("Channel {attribute_name} {operator} {value}"),
            Condition::ElectrodeAttribute {
                attribute_name,
                operator,
                value,
            } => format!("Electrode {attribute_name} {operator} {value}"),
        }
    }
}

fn any_row_matches<'a>(
    mut rows: impl Iterator<Item = &'a TsvRow>,
    attribute_name: &str,
    operator: CompareOperator,
    value: &str,
) -> bool {
    rows.any(|row| {
        row.get(attribute_name)
            .is_some_and(|v| compare_values(v, operator, value))
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogicalOperation {
    pub operator: LogicalOperator,
    pub conditions: Vec<FilterExpression>,
}

impl LogicalOperation {
    /*
     * An empty group matches everything whatever its operator. NOT matches
     * when the AND of its children does not.
     */
    pub fn evaluate(&self, subject: &Subject) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        let mut children = self.conditions.iter().map(|c| c.evaluate(subject));
        match self.operator {
            LogicalOperator::And => children.all(|b| b),
            LogicalOperator::Or => children.any(|b| b),
            LogicalOperator::Not => !children.all(|b| b),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterExpression {
    Condition(Condition),
    Logical(LogicalOperation),
}

impl From<Condition> for FilterExpression {
    fn from(condition: Condition) -> Self {
        FilterExpression::Condition(condition)
    }
}

impl Default for FilterExpression {
    fn default() -> Self {
        FilterExpression::and(Vec::new())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Simple,
    Advanced,
}

impl FilterExpression {
    pub fn group(operator: LogicalOperator, conditions: Vec<FilterExpression>) -> Self {
        FilterExpression::Logical(LogicalOperation {
            operator,
            conditions,
        })
    }

    pub fn and(conditions: Vec<FilterExpression>) -> Self {
        Self::group(LogicalOperator::And, conditions)
    }

    pub fn or(conditions: Vec<FilterExpression>) -> Self {
        Self::group(LogicalOperator::Or, conditions)
    }

    pub fn not(conditions: Vec<FilterExpression>) -> Self {
        Self::group(LogicalOperator::Not, conditions)
    }

    /* A simple-mode filter: the AND of a flat list of conditions. */
    pub fn from_simple(conditions: Vec<Condition>) -> Self {
        Self::and(conditions.into_iter().map(FilterExpression::from).collect())
    }

    pub fn evaluate(&self, subject: &Subject) -> bool {
        match self {
            FilterExpression::Condition(c) => c.evaluate(subject),
            FilterExpression::Logical(op) => op.evaluate(subject),
        }
    }

    /*
     * True when the filter can be shown as a flat condition list: an AND group
     * whose children are all conditions, or a lone condition (a one-element
     * AND).
     */
    pub fn is_simple(&self) -> bool {
        match self {
            FilterExpression::Logical(op) => {
                op.operator == LogicalOperator::And
                    && op
                        .conditions
                        .iter()
                        .all(|c| matches!(c, FilterExpression::Condition(_)))
            }
            FilterExpression::Condition(_) => true,
        }
    }

    /* The flat condition list of a simple filter. */
    pub fn to_simple(&self) -> Result<Vec<Condition>> {
        if !self.is_simple() {
            return Err(FilterError::NotSimple);
        }
        Ok(match self {
            FilterExpression::Condition(c) => vec![c.clone()],
            FilterExpression::Logical(op) => op
                .conditions
                .iter()
                .filter_map(|c| match c {
                    FilterExpression::Condition(c) => Some(c.clone()),
                    FilterExpression::Logical(_) => None,
                })
                .collect(),
        })
    }

    pub fn mode(&self) -> FilterMode {
        if self.is_simple() {
            FilterMode::Simple
        } else {
            FilterMode::Advanced
        }
    }

    pub fn condition_count(&self) -> usize {
        match self {
            FilterExpression::Condition(_) => 1,
            FilterExpression::Logical(op) => op.conditions.iter().map(Self::condition_count).sum(),
        }
    }

    pub fn describe(&self, registry: &EntityRegistry) -> String {
        match self {
            FilterExpression::Condition(c) => c.describe(registry),
            FilterExpression::Logical(op) => {
                let parts: Vec<String> = op
                    .conditions
                    .iter()
                    .map(|c| c.describe(registry))
                    .collect();
                match op.operator {
                    LogicalOperator::Not => format!("NOT ({})", parts.join(" AND ")),
                    other => format!("({})", parts.join(format!(" {other} ").as_str())),
                }
            }
        }
    }

    /*
     * Builds an expression from parsed JSON. Conditions written by older
     * versions with list-valued `subject_ids` / `modalities` fields are read
     * using the first list element.
     */
    pub fn from_value(value: Value) -> Result<FilterExpression> {
        let Value::Object(mut object) = value else {
            return Err(FilterError::InvalidExpression(
                "expected a JSON object".to_string(),
            ));
        };
        let node_type = object
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string);
        match node_type.as_deref() {
            Some(LOGICAL_OPERATION_TAG) => {
                let operator = match object.remove("operator") {
                    Some(v) => serde_json::from_value(v)?,
                    None => LogicalOperator::And,
                };
                let conditions = match object.remove("conditions") {
                    Some(Value::Array(items)) => items
                        .into_iter()
                        .map(FilterExpression::from_value)
                        .collect::<Result<Vec<_>>>()?,
                    None | Some(Value::Null) => Vec::new(),
                    Some(_) => {
                        return Err(FilterError::InvalidExpression(
                            "'conditions' must be a list".to_string(),
                        ));
                    }
                };
                Ok(FilterExpression::group(operator, conditions))
            }
            Some(_) => {
                upgrade_legacy_fields(&mut object);
                Ok(FilterExpression::Condition(serde_json::from_value(
                    Value::Object(object),
                )?))
            }
            None => Err(FilterError::InvalidExpression(
                "missing 'type' field".to_string(),
            )),
        }
    }

    pub fn from_json(text: &str) -> Result<FilterExpression> {
        Self::from_value(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn upgrade_legacy_fields(object: &mut Map<String, Value>) {
    for (legacy, field) in [("subject_ids", "subject_id"), ("modalities", "modality")] {
        let Some(old) = object.remove(legacy) else {
            continue;
        };
        if object.contains_key(field) {
            continue;
        }
        let first = match old {
            Value::Array(items) => items.into_iter().next().unwrap_or(Value::Null),
            other => other,
        };
        let text = match first {
            Value::String(s) => s,
            Value::Null => String::new(),
            other => other.to_string(),
        };
        object.insert(field.to_string(), Value::String(text));
    }
}

impl Serialize for FilterExpression {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            FilterExpression::Condition(c) => c.serialize(serializer),
            FilterExpression::Logical(op) => {
                let mut state = serializer.serialize_struct("LogicalOperation", 3)?;
                state.serialize_field("type", LOGICAL_OPERATION_TAG)?;
                state.serialize_field("operator", &op.operator)?;
                state.serialize_field("conditions", &op.conditions)?;
                state.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for FilterExpression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        FilterExpression::from_value(value).map_err(de::Error::custom)
    }
}

/* Returns a dataset holding only the subjects the expression matches. */
pub fn apply_filter(dataset: &Dataset, expression: &FilterExpression) -> Dataset {
    let subjects: Vec<Subject> = dataset
        .subjects
        .iter()
        .filter(|s| expression.evaluate(s))
        .cloned()
        .collect();
    log::debug!(
        "Filters: {} of {} subjects match",
        subjects.len(),
        dataset.subjects.len()
    );
    Dataset {
        root_path: dataset.root_path.clone(),
        subjects,
        dataset_description: dataset.dataset_description.clone(),
        dataset_files: dataset.dataset_files.clone(),
    }
}

pub fn matching_subject_ids(dataset: &Dataset, expression: &FilterExpression) -> Vec<String> {
    dataset
        .subjects
        .iter()
        .filter(|s| expression.evaluate(s))
        .map(|s| s.subject_id.clone())
        .collect()
}
