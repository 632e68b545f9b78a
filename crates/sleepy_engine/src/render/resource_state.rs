//! CPU-side record of the usage state of every tracked GPU resource
//!
//! States are updated as barriers are recorded. Because command lists execute
//! in submission order on the single queue, the recorded state is the state the
//! resource will be in when the next submitted work runs.

use std::collections::HashMap;

use super::backend::{BackendError, GpuCommand, ResourceId, ResourceState};
use super::error::{RenderError, RenderResult};

/// Tracks the current [`ResourceState`] per resource
#[derive(Debug, Default)]
pub struct ResourceStateTracker {
    states: HashMap<ResourceId, ResourceState>,
}

impl ResourceStateTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a resource in `state`
    pub fn register(&mut self, resource: ResourceId, state: ResourceState) {
        self.states.insert(resource, state);
    }

    /// Stop tracking a resource
    pub fn forget(&mut self, resource: ResourceId) {
        self.states.remove(&resource);
    }

    /// Current state of a resource, if tracked
    pub fn state(&self, resource: ResourceId) -> Option<ResourceState> {
        self.states.get(&resource).copied()
    }

    /// Check that `resource` is in `expected`
    pub fn require(&self, resource: ResourceId, expected: ResourceState) -> RenderResult<()> {
        let actual = self.state(resource).ok_or(BackendError::UnknownHandle {
            kind: "resource",
            id: resource.0,
        })?;
        if actual != expected {
            log::error!(
                "Resource state violation: {:?} is {:?}, expected {:?}",
                resource,
                actual,
                expected
            );
            return Err(RenderError::ResourceState { resource, expected, actual });
        }
        Ok(())
    }

    /// Build the barrier moving `resource` from `before` to `after`
    ///
    /// Fails without changing anything if the resource is not in `before`.
    pub fn transition(
        &mut self,
        resource: ResourceId,
        before: ResourceState,
        after: ResourceState,
    ) -> RenderResult<GpuCommand> {
        self.require(resource, before)?;
        self.states.insert(resource, after);
        Ok(GpuCommand::ResourceBarrier { resource, before, after })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_updates_state() {
        let mut tracker = ResourceStateTracker::new();
        let id = ResourceId(1);
        tracker.register(id, ResourceState::Present);

        let cmd = tracker
            .transition(id, ResourceState::Present, ResourceState::RenderTarget)
            .unwrap();
        assert_eq!(
            cmd,
            GpuCommand::ResourceBarrier {
                resource: id,
                before: ResourceState::Present,
                after: ResourceState::RenderTarget,
            }
        );
        assert_eq!(tracker.state(id), Some(ResourceState::RenderTarget));
    }

    #[test]
    fn test_wrong_before_state_is_rejected() {
        let mut tracker = ResourceStateTracker::new();
        let id = ResourceId(7);
        tracker.register(id, ResourceState::Common);

        let err = tracker
            .transition(id, ResourceState::Present, ResourceState::RenderTarget)
            .unwrap_err();
        assert!(matches!(
            err,
            RenderError::ResourceState { actual: ResourceState::Common, expected: ResourceState::Present, .. }
        ));
        assert_eq!(tracker.state(id), Some(ResourceState::Common));
    }

    #[test]
    fn test_untracked_resource() {
        let tracker = ResourceStateTracker::new();
        assert!(matches!(
            tracker.require(ResourceId(2), ResourceState::Present),
            Err(RenderError::Backend(BackendError::UnknownHandle { .. }))
        ));
    }
}
