// Handle lifetimes
//
// Every Vulkan handle is registered here right after it is created, together
// with the action that destroys it. The queue runs those actions in reverse
// registration order, so a handle is always released before anything it was
// built from. Dropping the queue flushes it, which covers early returns during
// initialization as well as normal shutdown.

use thiserror::Error;

/// Kinds of handle the renderer owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Instance,
    DebugMessenger,
    Surface,
    Device,
    Allocator,
    Swapchain,
    ImageView,
    CommandPool,
    FrameSync,
    ShaderModule,
    RenderPass,
    Pipeline,
    Framebuffer,
    VertexBuffer,
}

impl ResourceKind {
    /// Kinds that must still be alive while a handle of this kind exists.
    pub fn dependencies(self) -> &'static [ResourceKind] {
        use ResourceKind::*;
        match self {
            Instance => &[],
            DebugMessenger | Surface | Device => &[Instance],
            Allocator | CommandPool | FrameSync | ShaderModule | RenderPass => &[Device],
            Swapchain => &[Device, Surface],
            ImageView => &[Swapchain],
            Pipeline => &[RenderPass, ShaderModule],
            Framebuffer => &[RenderPass, ImageView],
            VertexBuffer => &[Allocator],
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifetimeError {
    #[error("{kind:?} registered before its dependency {missing:?}")]
    MissingDependency {
        kind: ResourceKind,
        missing: ResourceKind,
    },
}

struct Entry {
    kind: ResourceKind,
    destroy: Box<dyn FnOnce()>,
}

/// LIFO list of destroy actions.
#[derive(Default)]
pub struct DeletionQueue {
    entries: Vec<Entry>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the destroy action for a freshly created handle.
    ///
    /// If one of `kind`'s dependencies is not registered yet the handle is
    /// destroyed on the spot and an error is returned, so nothing leaks.
    pub fn push<F>(&mut self, kind: ResourceKind, destroy: F) -> Result<(), LifetimeError>
    where
        F: FnOnce() + 'static,
    {
        if let Some(&missing) = kind.dependencies().iter().find(|&&dep| !self.is_live(dep)) {
            destroy();
            return Err(LifetimeError::MissingDependency { kind, missing });
        }

        self.entries.push(Entry {
            kind,
            destroy: Box::new(destroy),
        });
        Ok(())
    }

    pub fn is_live(&self, kind: ResourceKind) -> bool {
        self.entries.iter().any(|entry| entry.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Destroy everything, newest first.
    pub fn flush(&mut self) {
        if self.is_empty() {
            return;
        }
        log::debug!("Releasing {} handles", self.len());
        while let Some(entry) = self.entries.pop() {
            log::debug!("Destroying {:?}", entry.kind);
            (entry.destroy)();
        }
    }
}

impl Drop for DeletionQueue {
    fn drop(&mut self) {
        self.flush();
    }
}
