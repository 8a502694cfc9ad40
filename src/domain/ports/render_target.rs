//! Port definition for the consumer's render target.

use std::sync::Arc;

use image::DynamicImage;

use crate::domain::entities::Viewport;

/// Opaque handle to whatever the consumer renders into.
///
/// The engine uses it only to read a size hint, to apply a bitmap or
/// placeholder, and to learn about detachment; it never interprets the
/// target beyond these three operations. All methods are synchronous and
/// must be cheap; heavy rendering work belongs to the consumer.
pub trait RenderTarget: Send + Sync {
    /// Current viewport size, if the target already knows it.
    fn viewport_hint(&self) -> Option<Viewport>;

    /// Applies a decoded bitmap to the target.
    fn apply_bitmap(&self, image: Arc<DynamicImage>);

    /// Applies a placeholder resource to the target.
    fn apply_placeholder(&self, resource_id: u32);

    /// Registers the cancellation hook to run when the target detaches.
    ///
    /// The orchestrator calls this synchronously before its first suspension
    /// point, so a target that detaches mid-flight always finds the binding
    /// in place. Implementations that never detach may drop the hook.
    fn bind_detach(&self, cancel: Box<dyn FnOnce() + Send>);
}
