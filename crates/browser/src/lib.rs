pub mod actions;
pub mod cdp;
pub mod diff;
pub mod outline;
pub mod reduce;
pub mod session;

pub use actions::ActionResolver;
pub use cdp::{CdpClient, KeySpec};
pub use diff::{diff_outlines, DiffReport, DiffStats, ElementRecord};
pub use outline::{parse_ax_nodes, AxNode, HandleMap, OutlineBuilder, RoleTables, Snapshot};
pub use reduce::{baseline, optimize, ReduceOptions};
pub use session::{find_browser_binary, BrowserEvent, Session};
