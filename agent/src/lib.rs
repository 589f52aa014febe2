pub mod agent;
pub mod identity;
pub mod runtime;
pub mod session;

pub use agent::{AgentClient, AgentError, AgentReply, InvokeOptions};
pub use identity::{AgentArn, AgentIdentity, IdentityConfig};
pub use runtime::{
    AgentEvent, AgentRuntime, AwsSettings, BedrockRuntime, FragmentSource, InvokeRequest,
    RemoteCompletion, StaticCredentials,
};
pub use session::SessionToken;
