use crate::commands::CommandError;
use crate::frame::Frame;
use crate::store::StoreGuard;

/// A command that runs against the store. The caller holds the exclusivity token for the
/// whole call, so an implementation sees and leaves the store in a consistent state.
pub trait Executable: Send + Sync {
    fn exec(&self, store: &mut StoreGuard) -> Result<Frame, CommandError>;

    /// Whether a successful run changes the store and must reach the mutation log.
    fn is_modifying(&self) -> bool {
        false
    }
}
