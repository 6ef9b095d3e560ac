pub mod task;
pub mod team;
pub mod user;

pub use task::{BugFlagRequest, BugReport, NewTask, Task, TaskPatch, TaskPriority, TaskStatus, TaskView};
pub use team::{Team, TeamSummary, TeamView};
pub use user::{Identity, Role, User, UserSummary};
