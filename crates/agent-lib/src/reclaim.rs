//! Node-level reclaim: the garbage-collection capabilities tried before any
//! workload is evicted, and the signal-to-action mapping.

use async_trait::async_trait;

use crate::types::Signal;

/// Deletes container images that no running container references.
#[async_trait]
pub trait ImageGc: Send + Sync {
    async fn delete_unused_images(&self) -> anyhow::Result<()>;
}

/// Deletes exited containers and their writable layers.
#[async_trait]
pub trait ContainerGc: Send + Sync {
    async fn delete_all_unused_containers(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimAction {
    ImageGc,
    ContainerGc,
}

/// Reclaim actions registered for a signal, in invocation order.
///
/// On a shared filesystem the node-fs signals reclaim both images and
/// containers; with a dedicated image filesystem the image-fs signals target
/// image collection only and node-fs pressure has nothing to reclaim at node
/// level. Memory and pid signals never have node-level reclaim.
pub fn reclaim_actions_for_signal(signal: Signal, dedicated_image_fs: bool) -> Vec<ReclaimAction> {
    match signal {
        Signal::NodeFsAvailable | Signal::NodeFsInodesFree if !dedicated_image_fs => {
            vec![ReclaimAction::ImageGc, ReclaimAction::ContainerGc]
        }
        Signal::ImageFsAvailable | Signal::ImageFsInodesFree if dedicated_image_fs => {
            vec![ReclaimAction::ImageGc]
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_filesystem_reclaims_images_then_containers() {
        assert_eq!(
            reclaim_actions_for_signal(Signal::NodeFsAvailable, false),
            vec![ReclaimAction::ImageGc, ReclaimAction::ContainerGc]
        );
        assert_eq!(
            reclaim_actions_for_signal(Signal::NodeFsInodesFree, false),
            vec![ReclaimAction::ImageGc, ReclaimAction::ContainerGc]
        );
    }

    #[test]
    fn test_dedicated_image_filesystem_splits_reclaim() {
        assert!(reclaim_actions_for_signal(Signal::NodeFsAvailable, true).is_empty());
        assert_eq!(
            reclaim_actions_for_signal(Signal::ImageFsAvailable, true),
            vec![ReclaimAction::ImageGc]
        );
        // Image-fs signals are not independently reclaimable on a shared
        // filesystem.
        assert!(reclaim_actions_for_signal(Signal::ImageFsAvailable, false).is_empty());
    }

    #[test]
    fn test_memory_and_pid_have_no_node_level_reclaim() {
        for dedicated in [false, true] {
            assert!(reclaim_actions_for_signal(Signal::MemoryAvailable, dedicated).is_empty());
            assert!(
                reclaim_actions_for_signal(Signal::AllocatableMemoryAvailable, dedicated)
                    .is_empty()
            );
            assert!(reclaim_actions_for_signal(Signal::PidAvailable, dedicated).is_empty());
        }
    }
}
