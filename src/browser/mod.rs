pub mod page;
pub mod session;

// Re-export common types
pub use page::{BrowserError, Fragment, FragmentKind, Launcher, Page};
pub use session::{WebDriverLauncher, WebDriverPage};
