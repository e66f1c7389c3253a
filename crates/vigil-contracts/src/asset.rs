//! Asset and graph kinds.
//!
//! An environment holds one graph per `GraphKind`. Every asset in a graph
//! shares the graph's `AssetType`; filters are the exception and are
//! spliced into existing graphs instead of owning one.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The kind of a single asset definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Decoder,
    Rule,
    Output,
    Filter,
}

impl AssetType {
    /// Name used by the catalog to locate assets of this type.
    pub fn as_str(self) -> &'static str {
        match self {
            AssetType::Decoder => "decoder",
            AssetType::Rule => "rule",
            AssetType::Output => "output",
            AssetType::Filter => "filter",
        }
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One of the graphs an environment may declare, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphKind {
    Decoders,
    Rules,
    Outputs,
}

impl GraphKind {
    pub const ALL: [GraphKind; 3] = [GraphKind::Decoders, GraphKind::Rules, GraphKind::Outputs];

    /// The environment document key for this graph.
    pub fn as_str(self) -> &'static str {
        match self {
            GraphKind::Decoders => "decoders",
            GraphKind::Rules => "rules",
            GraphKind::Outputs => "outputs",
        }
    }

    /// The type of every asset listed under this graph.
    pub fn asset_type(self) -> AssetType {
        match self {
            GraphKind::Decoders => AssetType::Decoder,
            GraphKind::Rules => AssetType::Rule,
            GraphKind::Outputs => AssetType::Output,
        }
    }

    /// Name of the synthetic root node seeded into this graph.
    pub fn input_node(self) -> String {
        format!("{}Input", self.as_str())
    }
}

impl fmt::Display for GraphKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GraphKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        GraphKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown graph '{}'", s))
    }
}
