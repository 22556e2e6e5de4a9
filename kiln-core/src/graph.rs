//! Deployment graph: futures and their dependency edges.
//!
//! A [`DeploymentGraph`] is an immutable description of the steps of a
//! deployment, produced by an external builder. Each step is a [`Future`]:
//! a tagged variant over the supported kinds of on-chain operations, with
//! kind-specific parameters. Edges point at futures that must reach a
//! terminal success state first.
//!
//! Dependencies are both explicit (`after`) and implicit: referencing
//! another future's address or emitted event creates an edge to it.

use crate::error::{KilnError, Result};
use crate::types::{Address, FutureId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// The kind of on-chain operation a future performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FutureKind {
    /// Deploy a contract from an inline artifact.
    ContractDeployment,
    /// Deploy a contract resolved by artifact name.
    NamedArtifactContractDeployment,
    /// Deploy a library from an inline artifact.
    LibraryDeployment,
    /// Deploy a library resolved by artifact name.
    NamedArtifactLibraryDeployment,
    /// Call a state-mutating contract function.
    ContractCall,
    /// Call a read-only contract function.
    StaticCall,
    /// Send a raw transaction with arbitrary data.
    SendData,
    /// Read an argument out of an event emitted by an earlier future.
    ReadEventArgument,
    /// Bind an existing on-chain address to a contract.
    ContractAt,
}

impl FutureKind {
    /// Whether this kind produces a deployed address on success.
    #[must_use]
    pub fn is_deployment(&self) -> bool {
        matches!(
            self,
            Self::ContractDeployment
                | Self::NamedArtifactContractDeployment
                | Self::LibraryDeployment
                | Self::NamedArtifactLibraryDeployment
        )
    }

    /// Whether this kind submits an on-chain transaction.
    ///
    /// `ContractAt` and `ReadEventArgument` resolve synchronously from data
    /// already on chain and never submit anything.
    #[must_use]
    pub fn submits_transaction(&self) -> bool {
        !matches!(self, Self::ContractAt | Self::ReadEventArgument)
    }
}

impl fmt::Display for FutureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ContractDeployment => "contract_deployment",
            Self::NamedArtifactContractDeployment => "named_artifact_contract_deployment",
            Self::LibraryDeployment => "library_deployment",
            Self::NamedArtifactLibraryDeployment => "named_artifact_library_deployment",
            Self::ContractCall => "contract_call",
            Self::StaticCall => "static_call",
            Self::SendData => "send_data",
            Self::ReadEventArgument => "read_event_argument",
            Self::ContractAt => "contract_at",
        };
        f.write_str(name)
    }
}

/// Wei amounts ride through serde as decimal strings: `u128` does not
/// survive serde's internally tagged buffering, and JSON numbers lose
/// precision well below the top of the wei range. Plain integers are
/// still accepted on input.
mod wei {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        struct WeiVisitor;

        impl Visitor<'_> for WeiVisitor {
            type Value = u128;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a wei amount as a decimal string or integer")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
                v.parse().map_err(de::Error::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
                Ok(u128::from(v))
            }
        }

        deserializer.deserialize_any(WeiVisitor)
    }
}

/// Expression resolving to an on-chain address at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AddressExpr {
    /// A literal address known at graph-build time.
    Literal {
        /// The address.
        address: Address,
    },
    /// The address produced by another future (deployment or contract-at).
    FutureResult {
        /// The future whose success value is the address.
        future: FutureId,
    },
    /// One of the account addresses available for this run.
    Account {
        /// Index into the run's account list.
        index: usize,
    },
}

/// Kind-specific parameters of a future.
///
/// The variant is the future's kind; the driver switches exhaustively on
/// this tag rather than relying on trait polymorphism.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FutureParams {
    /// Deploy a contract from an inline artifact.
    ContractDeployment {
        /// Artifact source identifier (e.g., a build-info path).
        artifact: String,
        /// Constructor arguments.
        args: Vec<Value>,
        /// Native value to send with the deployment, in wei.
        #[serde(default, with = "wei")]
        value: u128,
        /// Index of the sending account.
        #[serde(default)]
        from: Option<usize>,
    },
    /// Deploy a contract resolved by artifact name.
    NamedArtifactContractDeployment {
        /// Contract name resolved against the compilation output.
        contract_name: String,
        /// Constructor arguments.
        args: Vec<Value>,
        /// Native value to send with the deployment, in wei.
        #[serde(default, with = "wei")]
        value: u128,
        /// Index of the sending account.
        #[serde(default)]
        from: Option<usize>,
    },
    /// Deploy a library from an inline artifact.
    LibraryDeployment {
        /// Artifact source identifier.
        artifact: String,
        /// Index of the sending account.
        #[serde(default)]
        from: Option<usize>,
    },
    /// Deploy a library resolved by artifact name.
    NamedArtifactLibraryDeployment {
        /// Library name resolved against the compilation output.
        contract_name: String,
        /// Index of the sending account.
        #[serde(default)]
        from: Option<usize>,
    },
    /// Call a state-mutating contract function.
    ContractCall {
        /// Target contract address.
        target: AddressExpr,
        /// Function name or signature.
        function: String,
        /// Call arguments.
        args: Vec<Value>,
        /// Native value to send with the call, in wei.
        #[serde(default, with = "wei")]
        value: u128,
        /// Index of the sending account.
        #[serde(default)]
        from: Option<usize>,
    },
    /// Call a read-only contract function.
    StaticCall {
        /// Target contract address.
        target: AddressExpr,
        /// Function name or signature.
        function: String,
        /// Call arguments.
        args: Vec<Value>,
        /// Index of the calling account.
        #[serde(default)]
        from: Option<usize>,
    },
    /// Send a raw transaction.
    SendData {
        /// Recipient address.
        to: AddressExpr,
        /// Hex-encoded calldata.
        data: String,
        /// Native value to send, in wei.
        #[serde(default, with = "wei")]
        value: u128,
        /// Index of the sending account.
        #[serde(default)]
        from: Option<usize>,
    },
    /// Read an argument from an event emitted by an earlier future.
    ReadEventArgument {
        /// The future whose transaction emitted the event.
        emitter: FutureId,
        /// Event name.
        event: String,
        /// Argument name or index within the event.
        argument: String,
        /// Which occurrence of the event, when emitted more than once.
        #[serde(default)]
        event_index: u32,
    },
    /// Bind an existing address to a contract.
    ContractAt {
        /// The address to bind.
        address: AddressExpr,
        /// Contract name for the binding.
        contract_name: String,
    },
}

impl FutureParams {
    /// Get the kind tag of these parameters.
    #[must_use]
    pub fn kind(&self) -> FutureKind {
        match self {
            Self::ContractDeployment { .. } => FutureKind::ContractDeployment,
            Self::NamedArtifactContractDeployment { .. } => {
                FutureKind::NamedArtifactContractDeployment
            }
            Self::LibraryDeployment { .. } => FutureKind::LibraryDeployment,
            Self::NamedArtifactLibraryDeployment { .. } => {
                FutureKind::NamedArtifactLibraryDeployment
            }
            Self::ContractCall { .. } => FutureKind::ContractCall,
            Self::StaticCall { .. } => FutureKind::StaticCall,
            Self::SendData { .. } => FutureKind::SendData,
            Self::ReadEventArgument { .. } => FutureKind::ReadEventArgument,
            Self::ContractAt { .. } => FutureKind::ContractAt,
        }
    }

    /// Index of the account these parameters send from, if any.
    #[must_use]
    pub fn from_account(&self) -> Option<usize> {
        match self {
            Self::ContractDeployment { from, .. }
            | Self::NamedArtifactContractDeployment { from, .. }
            | Self::LibraryDeployment { from, .. }
            | Self::NamedArtifactLibraryDeployment { from, .. }
            | Self::ContractCall { from, .. }
            | Self::StaticCall { from, .. }
            | Self::SendData { from, .. } => *from,
            Self::ReadEventArgument { .. } | Self::ContractAt { .. } => None,
        }
    }

    /// Future ids these parameters reference implicitly.
    fn referenced_futures(&self) -> Vec<FutureId> {
        fn from_expr(expr: &AddressExpr) -> Option<FutureId> {
            match expr {
                AddressExpr::FutureResult { future } => Some(future.clone()),
                _ => None,
            }
        }

        match self {
            Self::ContractCall { target, .. } | Self::StaticCall { target, .. } => {
                from_expr(target).into_iter().collect()
            }
            Self::SendData { to, .. } => from_expr(to).into_iter().collect(),
            Self::ReadEventArgument { emitter, .. } => vec![emitter.clone()],
            Self::ContractAt { address, .. } => from_expr(address).into_iter().collect(),
            _ => Vec::new(),
        }
    }
}

/// One declared step in a deployment graph.
///
/// Immutable once the graph is built. Identity is the id: the same id in a
/// later graph version refers to the same future for reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Future {
    /// Stable, unique identifier.
    pub id: FutureId,
    /// Explicitly declared dependencies.
    pub after: Vec<FutureId>,
    /// Kind-specific parameters (the kind is the variant tag).
    pub params: FutureParams,
}

impl Future {
    /// Create a future with no explicit dependencies.
    pub fn new(id: impl Into<FutureId>, params: FutureParams) -> Self {
        Self {
            id: id.into(),
            after: Vec::new(),
            params,
        }
    }

    /// Add an explicit dependency.
    #[must_use]
    pub fn after(mut self, dependency: impl Into<FutureId>) -> Self {
        self.after.push(dependency.into());
        self
    }

    /// Get the kind tag.
    #[must_use]
    pub fn kind(&self) -> FutureKind {
        self.params.kind()
    }

    /// Full dependency set: explicit `after` edges plus futures referenced
    /// by the parameters, deduplicated in declaration order.
    #[must_use]
    pub fn dependencies(&self) -> Vec<FutureId> {
        let mut deps = self.after.clone();
        for dep in self.params.referenced_futures() {
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }
        deps
    }
}

/// An immutable, declaration-ordered collection of futures.
#[derive(Debug, Clone, Default)]
pub struct DeploymentGraph {
    futures: Vec<Future>,
    index: HashMap<FutureId, usize>,
}

impl DeploymentGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a future to the graph.
    ///
    /// Declaration order is preserved; it breaks ties when batches are
    /// computed, so it is part of the graph's observable behavior.
    pub fn add_future(&mut self, future: Future) -> Result<()> {
        if self.index.contains_key(&future.id) {
            return Err(KilnError::DuplicateFutureId {
                future_id: future.id,
            });
        }
        self.index.insert(future.id.clone(), self.futures.len());
        self.futures.push(future);
        Ok(())
    }

    /// Get a future by id.
    #[must_use]
    pub fn get(&self, id: &FutureId) -> Option<&Future> {
        self.index.get(id).map(|&i| &self.futures[i])
    }

    /// Check whether a future id is present.
    #[must_use]
    pub fn contains(&self, id: &FutureId) -> bool {
        self.index.contains_key(id)
    }

    /// Iterate futures in declaration order.
    pub fn futures(&self) -> impl Iterator<Item = &Future> {
        self.futures.iter()
    }

    /// Number of futures in the graph.
    #[must_use]
    pub fn len(&self) -> usize {
        self.futures.len()
    }

    /// Check if the graph is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.futures.is_empty()
    }

    /// Validate dependency references.
    ///
    /// Every explicit and implicit dependency must name a future in the
    /// graph. Acyclicity is re-checked by the batcher.
    pub fn validate(&self) -> Result<()> {
        for future in &self.futures {
            for dep in future.dependencies() {
                if !self.contains(&dep) {
                    return Err(KilnError::UnknownDependency {
                        future_id: future.id.clone(),
                        dependency: dep,
                    });
                }
            }
        }
        Ok(())
    }
}
