pub mod backend;
pub mod error;
pub mod fixed_nodes;
pub mod markov_blanket;
pub mod node;
pub mod simulate;
pub mod sw_nodes;
pub mod theta_nodes;
pub mod w_nodes;

pub use backend::{Backend, PrecomputeOptions};
pub use error::NodeError;
pub use markov_blanket::{LoadingBlanket, Role, SparsityBlanket};
pub use node::{UpdateArgs, VariationalNode};
pub use sw_nodes::SWNode;
pub use theta_nodes::{ThetaWNode, ThetaZNode};
pub use w_nodes::{Covariance, PriorCovariance, SampleFrom, WNode};
