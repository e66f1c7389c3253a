//! Environments: a fully compiled detection pipeline.
//!
//! An environment document names the assets of each graph:
//!
//! ```json
//! {
//!   "filters":  ["filter/allow-internal/0"],
//!   "decoders": ["decoder/syslog/0", "decoder/sshd/0"],
//!   "rules":    ["rule/ssh-root-login/0"],
//!   "outputs":  ["output/alerts/0"]
//! }
//! ```
//!
//! Construction fetches every asset from the catalog, builds it, wires the
//! graphs from declared parents, splices filters in after their targets and
//! rejects graphs with dangling edges or cycles. Any failure abandons the
//! whole environment.
//!
//! The root expression is composed lazily on first use and cached:
//!
//! ```text
//! <environment> <chain>
//!   decodersInputNode <implication>     children combined with Or
//!   rulesInputNode <implication>        children combined with Broadcast
//!   outputsInputNode <implication>      children combined with Broadcast
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use vigil_contracts::{
    asset::{AssetType, GraphKind},
    error::{VigilError, VigilResult},
    Event, ProcessedEvent, Trace,
};
use vigil_core::{traits::Catalog, DanglingEdge, Expression, Graph};

use crate::asset::{Asset, AssetId};
use crate::registry::Registry;

const FILTERS_KEY: &str = "filters";

/// A built environment. Immutable; share it across threads behind an `Arc`.
pub struct Environment {
    id: Uuid,
    name: String,
    built_at: DateTime<Utc>,
    /// SHA-256 (hex) of the environment document and every asset document.
    fingerprint: String,
    assets: Vec<Asset>,
    index: HashMap<String, AssetId>,
    filters: Vec<AssetId>,
    graphs: BTreeMap<GraphKind, Graph<String, AssetId>>,
    expression: OnceLock<Expression>,
}

impl Environment {
    /// Build environment `name` from its JSON document.
    pub fn build(name: &str, document: &Value, catalog: &dyn Catalog, registry: &Registry) -> VigilResult<Self> {
        let mut builder = EnvironmentBuilder::new(name, catalog, registry);
        builder.hash(document.to_string().as_bytes());

        let object = document.as_object().ok_or_else(|| builder.malformed("document must be a JSON object"))?;

        // 1. filters
        if let Some(list) = object.get(FILTERS_KEY) {
            for filter in builder.string_list(FILTERS_KEY, list)? {
                let id = builder.load(AssetType::Filter, &filter)?;
                builder.filters.push(id);
            }
        }

        // 2. graph keys
        let mut declared = Vec::new();
        for (key, list) in object {
            if key == FILTERS_KEY {
                continue;
            }
            let kind: GraphKind = key
                .parse()
                .map_err(|_| builder.malformed(&format!("unknown key '{}'", key)))?;
            declared.push((kind, list));
        }
        if declared.is_empty() {
            return Err(VigilError::MissingGraph {
                environment: name.to_string(),
            });
        }
        declared.sort_by_key(|(kind, _)| *kind);

        // 3. graphs, 4. filter injection, 5. integrity
        for (kind, list) in declared {
            let names = builder.string_list(kind.as_str(), list)?;
            builder.add_graph(kind, &names)?;
        }
        builder.inject_filters()?;
        builder.check_integrity()?;

        Ok(builder.finish())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn assets(&self) -> &[Asset] {
        &self.assets
    }

    pub fn asset(&self, name: &str) -> Option<&Asset> {
        self.index.get(name).map(|id| &self.assets[*id])
    }

    /// Filters in the order the document lists them.
    pub fn filters(&self) -> impl Iterator<Item = &Asset> {
        self.filters.iter().map(|id| &self.assets[*id])
    }

    pub fn graphs(&self) -> &BTreeMap<GraphKind, Graph<String, AssetId>> {
        &self.graphs
    }

    pub fn graph(&self, kind: GraphKind) -> Option<&Graph<String, AssetId>> {
        self.graphs.get(&kind)
    }

    /// The root expression, composed on first call.
    pub fn expression(&self) -> &Expression {
        self.expression.get_or_init(|| {
            let graphs = self
                .graphs
                .iter()
                .map(|(kind, graph)| self.compose(*kind, graph, graph.root()))
                .collect();
            let expression = Expression::chain(self.name.clone(), graphs);
            debug!(environment = %self.name, terms = expression.term_count(), "root expression composed");
            expression
        })
    }

    /// Run `event` through the environment.
    ///
    /// Every graph runs, so `success` only reports that evaluation took
    /// place. Per-asset results are in the trace.
    pub fn evaluate(&self, event: Event) -> ProcessedEvent {
        let mut event = event;
        let mut trace = Trace::new();
        let success = self.expression().evaluate(&mut event, &mut trace);
        ProcessedEvent {
            environment: self.name.clone(),
            event,
            success,
            trace,
            processed_at: Utc::now(),
        }
    }

    /// Render every graph as one Graphviz `digraph`.
    pub fn graphviz(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "digraph \"{}\" {{", escape(&self.name));
        let _ = writeln!(out, "  compound=true;");
        let _ = writeln!(out, "  node [shape=box];");
        for (kind, graph) in &self.graphs {
            let _ = writeln!(out, "  subgraph cluster_{} {{", kind);
            let _ = writeln!(out, "    label=\"{}\";", kind);
            for node in graph.nodes().keys() {
                let _ = writeln!(out, "    \"{}\";", escape(node));
            }
            for (parent, children) in graph.edges() {
                for child in children {
                    let _ = writeln!(out, "    \"{}\" -> \"{}\";", escape(parent), escape(child));
                }
            }
            let _ = writeln!(out, "  }}");
        }
        out.push_str("}\n");
        out
    }

    fn compose(&self, kind: GraphKind, graph: &Graph<String, AssetId>, node: &str) -> Expression {
        let own = match graph.node(node) {
            Some(id) => self.assets[*id].expression.clone(),
            None => Expression::noop(node),
        };

        let children = graph.children(node);
        if children.is_empty() {
            return own;
        }

        let operands: Vec<Expression> = children.iter().map(|child| self.compose(kind, graph, child)).collect();
        let combined = match kind {
            GraphKind::Decoders => Expression::or(format!("{}Children", node), operands),
            GraphKind::Rules | GraphKind::Outputs => Expression::broadcast(format!("{}Children", node), operands),
        };
        Expression::implication(format!("{}Node", node), own, combined)
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("fingerprint", &self.fingerprint)
            .field("assets", &self.assets.len())
            .field("graphs", &self.graphs.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn escape(text: &str) -> String {
    text.replace('"', "\\\"")
}

// ── Construction ─────────────────────────────────────────────────────────────

struct EnvironmentBuilder<'a> {
    name: &'a str,
    catalog: &'a dyn Catalog,
    registry: &'a Registry,
    hasher: Sha256,
    assets: Vec<Asset>,
    index: HashMap<String, AssetId>,
    filters: Vec<AssetId>,
    graphs: BTreeMap<GraphKind, Graph<String, AssetId>>,
}

impl<'a> EnvironmentBuilder<'a> {
    fn new(name: &'a str, catalog: &'a dyn Catalog, registry: &'a Registry) -> Self {
        Self {
            name,
            catalog,
            registry,
            hasher: Sha256::new(),
            assets: Vec::new(),
            index: HashMap::new(),
            filters: Vec::new(),
            graphs: BTreeMap::new(),
        }
    }

    fn hash(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    fn malformed(&self, reason: &str) -> VigilError {
        VigilError::MalformedEnvironment {
            environment: self.name.to_string(),
            reason: reason.to_string(),
        }
    }

    fn string_list(&self, key: &str, list: &Value) -> VigilResult<Vec<String>> {
        let items = list
            .as_array()
            .ok_or_else(|| self.malformed(&format!("'{}' must be an array of asset names", key)))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.malformed(&format!("'{}' must contain only strings", key)))
            })
            .collect()
    }

    fn push(&mut self, asset: Asset) -> VigilResult<AssetId> {
        if self.index.contains_key(&asset.name) {
            return Err(self.malformed(&format!("asset '{}' is listed more than once", asset.name)));
        }
        let id = self.assets.len();
        self.index.insert(asset.name.clone(), id);
        self.assets.push(asset);
        Ok(id)
    }

    /// Fetch, validate and build one asset, then add it to the arena.
    fn load(&mut self, asset_type: AssetType, name: &str) -> VigilResult<AssetId> {
        let text = self.catalog.get_asset(asset_type, name)?;
        self.hash(text.as_bytes());

        let document: Value = serde_json::from_str(&text).map_err(|e| VigilError::InvalidAsset {
            asset: name.to_string(),
            reason: format!("not valid JSON: {}", e),
        })?;
        let asset = Asset::from_json(&document, asset_type, self.registry)?;
        if asset.name != name {
            return Err(VigilError::InvalidAsset {
                asset: name.to_string(),
                reason: format!("document declares name '{}'", asset.name),
            });
        }

        debug!(environment = %self.name, asset = %name, kind = %asset_type, "asset loaded");
        self.push(asset)
    }

    fn add_graph(&mut self, kind: GraphKind, names: &[String]) -> VigilResult<()> {
        let input = kind.input_node();
        let input_id = self.push(Asset::input(input.clone(), kind.asset_type()))?;
        let mut graph = Graph::new(input.clone(), input_id);

        let mut members = Vec::with_capacity(names.len());
        for name in names {
            let id = self.load(kind.asset_type(), name)?;
            graph.add_node(name.clone(), id);
            members.push(id);
        }

        for id in members {
            let asset = &self.assets[id];
            if asset.parents.is_empty() {
                graph.add_edge(input.clone(), asset.name.clone());
            } else {
                for parent in &asset.parents {
                    graph.add_edge(parent.clone(), asset.name.clone());
                }
            }
        }

        debug!(environment = %self.name, graph = %kind, nodes = graph.nodes().len(), "graph assembled");
        self.graphs.insert(kind, graph);
        Ok(())
    }

    fn inject_filters(&mut self) -> VigilResult<()> {
        for &id in &self.filters {
            let filter = &self.assets[id];
            let mut injected = false;
            for (kind, graph) in self.graphs.iter_mut() {
                let targets: Vec<&String> = filter
                    .parents
                    .iter()
                    .filter(|target| graph.has_node(target.as_str()))
                    .collect();
                match targets.as_slice() {
                    [] => {}
                    [target] => {
                        graph.inject_node(filter.name.clone(), id, target);
                        injected = true;
                    }
                    several => {
                        let names: Vec<&str> = several.iter().map(|t| t.as_str()).collect();
                        return Err(VigilError::InvalidAsset {
                            asset: filter.name.clone(),
                            reason: format!(
                                "filter follows several nodes of the [{}] graph: [{}]",
                                kind,
                                names.join(", ")
                            ),
                        });
                    }
                }
            }
            if injected {
                debug!(environment = %self.name, filter = %filter.name, "filter injected");
            } else {
                warn!(environment = %self.name, filter = %filter.name, "filter matches no node, skipped");
            }
        }
        Ok(())
    }

    fn check_integrity(&self) -> VigilResult<()> {
        for (kind, graph) in &self.graphs {
            if let Some(problem) = graph.dangling_edges().into_iter().next() {
                let reason = match problem {
                    DanglingEdge::MissingParent { parent, children } => {
                        format!("parent [{}] not found, for children [{}]", parent, children.join(", "))
                    }
                    DanglingEdge::MissingChild { parent, child } => {
                        format!("child [{}] not found, for parent [{}]", child, parent)
                    }
                };
                return Err(VigilError::Integrity {
                    graph: kind.to_string(),
                    reason,
                });
            }
            if let Some(node) = graph.find_cycle() {
                return Err(VigilError::Cycle {
                    graph: kind.to_string(),
                    node,
                });
            }
        }
        Ok(())
    }

    fn finish(self) -> Environment {
        let fingerprint = hex::encode(self.hasher.finalize());
        let environment = Environment {
            id: Uuid::new_v4(),
            name: self.name.to_string(),
            built_at: Utc::now(),
            fingerprint,
            assets: self.assets,
            index: self.index,
            filters: self.filters,
            graphs: self.graphs,
            expression: OnceLock::new(),
        };
        info!(
            environment = %environment.name,
            id = %environment.id,
            fingerprint = %environment.fingerprint,
            assets = environment.assets.len(),
            graphs = environment.graphs.len(),
            "environment built"
        );
        environment
    }
}
