use serde::{Deserialize, Serialize};
use strum::{EnumDiscriminants, EnumString, IntoStaticStr};

use crate::models::job::Params;

/// Largest edge accepted for a resize target.
pub const MAX_RESIZE_EDGE: u32 = 8000;

/// The closed set of transforms a job can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr, EnumDiscriminants)]
#[serde(tag = "op", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
#[strum_discriminants(name(OperationKind), derive(EnumString, IntoStaticStr))]
#[strum_discriminants(strum(serialize_all = "snake_case"))]
pub enum Operation {
    Grayscale,
    Edge,
    Resize { width: u32, height: u32 },
    /// Keep the original bytes; only the dimensions are read.
    Passthrough,
}

impl Operation {
    /// Builds an operation from its name and the request parameters.
    ///
    /// `resize` requires `width`/`height` (or `w`/`h`) in `1..=8000`.
    pub fn parse(name: &str, params: &Params) -> Result<Self, OperationError> {
        let kind: OperationKind = name
            .trim()
            .to_ascii_lowercase()
            .parse()
            .map_err(|_| OperationError::Unknown(name.to_string()))?;

        Ok(match kind {
            OperationKind::Grayscale => Operation::Grayscale,
            OperationKind::Edge => Operation::Edge,
            OperationKind::Passthrough => Operation::Passthrough,
            OperationKind::Resize => Operation::Resize {
                width: edge_param(params, "width", "w")?,
                height: edge_param(params, "height", "h")?,
            },
        })
    }

    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// Audit action recorded when this operation succeeds.
    pub fn audit_action(&self) -> String {
        format!("transform:{}", self.name())
    }
}

fn edge_param(params: &Params, key: &'static str, short: &'static str) -> Result<u32, OperationError> {
    let value = params
        .get(key)
        .or_else(|| params.get(short))
        .ok_or(OperationError::MissingParam(key))?;

    let edge = match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
    .ok_or(OperationError::InvalidParam(key))?;

    if edge == 0 || edge > u64::from(MAX_RESIZE_EDGE) {
        return Err(OperationError::InvalidParam(key));
    }
    Ok(edge as u32)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    #[error("unsupported operation '{0}'")]
    Unknown(String),

    #[error("missing parameter '{0}'")]
    MissingParam(&'static str),

    #[error("parameter '{0}' must be an integer in 1..={max}", max = MAX_RESIZE_EDGE)]
    InvalidParam(&'static str),
}
