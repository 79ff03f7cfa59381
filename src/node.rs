//! Node behaviour.
//!
//! A node type declares its plugs, which outputs each input affects, and how
//! to hash and compute each output. Graphs store node types as
//! `Arc<dyn NodeType>`, so one instance may back many nodes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Context as _;

use crate::context::{Context, Variable};
use crate::error::Result;
use crate::graph::Graph;
use crate::hash::{Digest, DigestHasher};
use crate::plug::{Direction, NodeId, PlugDescriptor, PlugId};
use crate::value::{Value, ValueKind};

/// How results of an output plug are cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CachePolicy {
    /// Results are cached by hash, and concurrent requests for the same
    /// result share a single computation.
    #[default]
    Standard,
    /// Results are never cached and every request computes. Suitable for
    /// outputs cheaper to compute than to look up.
    Uncached,
}

/// Behaviour of a node.
///
/// `affects` and `context_variables` must be pure functions of their
/// arguments: they are called while the graph structure is locked and must
/// not access the graph. `hash` and `compute` run without locks and may read
/// other plugs through their inputs argument.
///
/// Two evaluations that produce the same hash must produce the same value.
/// The default [`NodeType::hash`] satisfies this for any `compute` that only
/// reads the inputs reported by `affects` and the declared context variables
/// in the evaluation context.
pub trait NodeType: Send + Sync + 'static {
    /// Name of the node type. Mixed into every output hash.
    fn type_name(&self) -> &'static str;

    /// Plugs created with each node of this type, in declaration order.
    fn plugs(&self) -> Vec<PlugDescriptor>;

    /// Names of the outputs whose value depends on `input`.
    fn affects(&self, input: &str) -> Vec<String>;

    /// Context variables read when computing `output`.
    fn context_variables(&self, _output: &str) -> Vec<Variable> {
        Vec::new()
    }

    /// Caching behaviour for `output`.
    fn cache_policy(&self, _output: &str) -> CachePolicy {
        CachePolicy::Standard
    }

    /// Append everything `output` depends on to `hasher`.
    ///
    /// Override when `compute` reads inputs in a different context, or reads
    /// something `affects` does not report. Plugs hashed through
    /// [`HashInputs::hash_of`] and [`HashInputs::hash_in`] are tracked, and a
    /// memoized hash is recomputed once any of them changes.
    fn hash(&self, output: &str, inputs: &HashInputs<'_>, hasher: &mut DigestHasher) -> Result<()> {
        let _ = output;
        inputs.append_dependencies(hasher)
    }

    /// Compute the value of `output`. The result must be of the output's kind.
    fn compute(&self, output: &str, inputs: &ComputeInputs<'_>) -> anyhow::Result<Value>;
}

/// Access to upstream hashes while hashing an output.
pub struct HashInputs<'a> {
    pub(crate) graph: &'a Graph,
    pub(crate) node: NodeId,
    pub(crate) node_type: &'a dyn NodeType,
    pub(crate) output: &'a str,
    pub(crate) context: &'a Context,
    /// Plugs hashed through `hash_of` and `hash_in`, with their dirty counts.
    pub(crate) reads: RefCell<Vec<(PlugId, u64)>>,
}

impl fmt::Debug for HashInputs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashInputs")
            .field("node", &self.node)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

impl<'a> HashInputs<'a> {
    /// The evaluation context.
    pub fn context(&self) -> &Context {
        self.context
    }

    /// The output being hashed.
    pub fn output(&self) -> &str {
        self.output
    }

    /// Hash of a plug on this node in the evaluation context.
    pub fn hash_of(&self, name: &str) -> Result<Digest> {
        self.hash_in(name, self.context)
    }

    /// Hash of a plug on this node in another context.
    pub fn hash_in(&self, name: &str, context: &Context) -> Result<Digest> {
        let plug = self.graph.node_plug(self.node, name)?;
        let dirty_count = self.graph.dirty_count(plug)?;
        self.reads.borrow_mut().push((plug, dirty_count));
        self.graph.hash(plug, context)
    }

    /// Input plugs the output depends on, in declaration order.
    pub fn dependencies(&self) -> Result<Vec<PlugId>> {
        self.graph.dependencies(self.node, self.output)
    }

    /// The default hash: type name, output name, then the hash of every
    /// dependency in declaration order, then each declared context variable
    /// in declaration order.
    pub fn append_dependencies(&self, hasher: &mut DigestHasher) -> Result<()> {
        hasher
            .append_str(self.node_type.type_name())
            .append_str(self.output);
        for plug in self.dependencies()? {
            let digest = self.graph.hash(plug, self.context)?;
            hasher.append_digest(&digest);
        }
        for variable in self.node_type.context_variables(self.output) {
            self.context.hash_variable(variable, hasher);
        }
        Ok(())
    }
}

/// Access to upstream values while computing an output.
pub struct ComputeInputs<'a> {
    pub(crate) graph: &'a Graph,
    pub(crate) node: NodeId,
    pub(crate) output: &'a str,
    pub(crate) context: &'a Context,
}

impl fmt::Debug for ComputeInputs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeInputs")
            .field("node", &self.node)
            .field("output", &self.output)
            .finish_non_exhaustive()
    }
}

impl<'a> ComputeInputs<'a> {
    /// The evaluation context.
    pub fn context(&self) -> &Context {
        self.context
    }

    /// The output being computed.
    pub fn output(&self) -> &str {
        self.output
    }

    /// Value of a plug on this node.
    pub fn value(&self, name: &str) -> Result<Value> {
        let plug = self.graph.node_plug(self.node, name)?;
        self.graph.get_value(plug, self.context)
    }

    /// Value of a plug on this node in another context.
    ///
    /// Nodes that use this must override [`NodeType::hash`] to hash the plug
    /// in the same context.
    pub fn value_in(&self, name: &str, context: &Context) -> Result<Value> {
        let plug = self.graph.node_plug(self.node, name)?;
        self.graph.get_value(plug, context)
    }

    fn typed<T>(
        &self,
        name: &str,
        kind: ValueKind,
        extract: impl FnOnce(&Value) -> Option<T>,
    ) -> anyhow::Result<T> {
        let value = self.value(name)?;
        extract(&value).with_context(|| format!("plug {name:?} is not a {kind} plug"))
    }

    /// Value of a bool plug.
    pub fn bool(&self, name: &str) -> anyhow::Result<bool> {
        self.typed(name, ValueKind::Bool, Value::as_bool)
    }

    /// Value of an int plug.
    pub fn int(&self, name: &str) -> anyhow::Result<i64> {
        self.typed(name, ValueKind::Int, Value::as_int)
    }

    /// Value of a float plug.
    pub fn float(&self, name: &str) -> anyhow::Result<f64> {
        self.typed(name, ValueKind::Float, Value::as_float)
    }

    /// Value of a string plug.
    pub fn string(&self, name: &str) -> anyhow::Result<Arc<str>> {
        self.typed(name, ValueKind::String, |v| match v {
            Value::String(s) => Some(s.clone()),
            _ => None,
        })
    }

    /// Value of an int vector plug.
    pub fn int_vec(&self, name: &str) -> anyhow::Result<Arc<[i64]>> {
        self.typed(name, ValueKind::IntVec, |v| match v {
            Value::IntVec(s) => Some(s.clone()),
            _ => None,
        })
    }

    /// Value of a string vector plug.
    pub fn string_vec(&self, name: &str) -> anyhow::Result<Arc<[String]>> {
        self.typed(name, ValueKind::StringVec, |v| match v {
            Value::StringVec(s) => Some(s.clone()),
            _ => None,
        })
    }
}

type ComputeFn = dyn Fn(&ComputeInputs<'_>) -> anyhow::Result<Value> + Send + Sync;

struct FnOutput {
    compute: Arc<ComputeFn>,
    context_variables: Vec<Variable>,
    cache_policy: CachePolicy,
}

/// A node type assembled from closures.
///
/// Inputs affect every output unless [`FnNodeBuilder::affects`] narrows them.
///
/// # Example
///
/// ```
/// use plug_flow::{FnNode, Graph, Context, ValueKind};
///
/// let add = FnNode::builder("Add")
///     .input("a", 0)
///     .input("b", 0)
///     .output("sum", ValueKind::Int, |inputs| {
///         Ok((inputs.int("a")? + inputs.int("b")?).into())
///     })
///     .build();
///
/// let graph = Graph::new();
/// let node = graph.add_node("add", add);
/// let a = graph.plug(node, "a").unwrap();
/// let sum = graph.plug(node, "sum").unwrap();
/// graph.set_value(a, 2).unwrap();
/// assert_eq!(graph.get_value(sum, &Context::new()).unwrap().as_int(), Some(2));
/// ```
pub struct FnNode {
    type_name: &'static str,
    plugs: Vec<PlugDescriptor>,
    affects: HashMap<String, Vec<String>>,
    outputs: HashMap<String, FnOutput>,
}

impl fmt::Debug for FnNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnNode")
            .field("type_name", &self.type_name)
            .field("plugs", &self.plugs)
            .finish_non_exhaustive()
    }
}

impl FnNode {
    /// Start building a node type.
    pub fn builder(type_name: &'static str) -> FnNodeBuilder {
        FnNodeBuilder {
            type_name,
            plugs: Vec::new(),
            affects: HashMap::new(),
            outputs: HashMap::new(),
        }
    }

    fn output_names(&self) -> Vec<String> {
        self.plugs
            .iter()
            .filter(|p| p.direction == Direction::Output)
            .map(|p| p.name.clone())
            .collect()
    }
}

impl NodeType for FnNode {
    fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn plugs(&self) -> Vec<PlugDescriptor> {
        self.plugs.clone()
    }

    fn affects(&self, input: &str) -> Vec<String> {
        match self.affects.get(input) {
            Some(outputs) => outputs.clone(),
            None => self.output_names(),
        }
    }

    fn context_variables(&self, output: &str) -> Vec<Variable> {
        self.outputs
            .get(output)
            .map(|o| o.context_variables.clone())
            .unwrap_or_default()
    }

    fn cache_policy(&self, output: &str) -> CachePolicy {
        self.outputs
            .get(output)
            .map(|o| o.cache_policy)
            .unwrap_or_default()
    }

    fn compute(&self, output: &str, inputs: &ComputeInputs<'_>) -> anyhow::Result<Value> {
        let output = self
            .outputs
            .get(output)
            .with_context(|| format!("{} has no output {output:?}", self.type_name))?;
        (output.compute)(inputs)
    }
}

/// Builder for [`FnNode`].
pub struct FnNodeBuilder {
    type_name: &'static str,
    plugs: Vec<PlugDescriptor>,
    affects: HashMap<String, Vec<String>>,
    outputs: HashMap<String, FnOutput>,
}

impl fmt::Debug for FnNodeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnNodeBuilder")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

impl FnNodeBuilder {
    /// Declare an input plug with its default value.
    pub fn input(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.plugs.push(PlugDescriptor::input(name, default));
        self
    }

    /// Declare an output plug and the function computing it.
    pub fn output(
        mut self,
        name: impl Into<String>,
        kind: ValueKind,
        compute: impl Fn(&ComputeInputs<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        self.plugs.push(PlugDescriptor::output(name.clone(), kind));
        self.outputs.insert(
            name,
            FnOutput {
                compute: Arc::new(compute),
                context_variables: Vec::new(),
                cache_policy: CachePolicy::Standard,
            },
        );
        self
    }

    /// Restrict the outputs affected by `input`. Defaults to all outputs.
    pub fn affects<I, S>(mut self, input: &str, outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.affects
            .insert(input.to_string(), outputs.into_iter().map(Into::into).collect());
        self
    }

    /// Declare that `output` reads `variable` from the context.
    pub fn reads(mut self, output: &str, variable: Variable) -> Self {
        if let Some(o) = self.outputs.get_mut(output) {
            o.context_variables.push(variable);
        }
        self
    }

    /// Set the cache policy of `output`.
    pub fn cache_policy(mut self, output: &str, policy: CachePolicy) -> Self {
        if let Some(o) = self.outputs.get_mut(output) {
            o.cache_policy = policy;
        }
        self
    }

    /// Finish building.
    pub fn build(self) -> Arc<FnNode> {
        Arc::new(FnNode {
            type_name: self.type_name,
            plugs: self.plugs,
            affects: self.affects,
            outputs: self.outputs,
        })
    }
}
