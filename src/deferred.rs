use crate::result::{ConduitError, Result};

/// Refuse transaction operations whose declared result is deferred work.
/// A future or join handle handed back from the operation would still be
/// running when the transaction commits, so the commit would race the work.
/// Checked before any connection is provisioned.
pub(crate) fn reject_deferred<T>() -> Result<()> {
    let name = std::any::type_name::<T>();
    if name.contains("JoinHandle") || name.contains("Future") {
        return Err(ConduitError::DeferredOperationNotSupported(name.to_string()));
    }
    Ok(())
}
