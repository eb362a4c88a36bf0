pub mod image;
pub mod job;
pub mod policy;
pub mod release;
pub mod resource;
pub mod result;

pub use image::{CanonicalName, ImageInfo, ImageRef};
pub use policy::{Policy, PolicySet};
pub use release::{
    Automated, Change, ImageSpec, ReleaseImageSpec, ReleaseKind, ReleaseRequest, ReleaseSpec,
    ResourceSpec,
};
pub use resource::ResourceId;
pub use result::{ContainerUpdate, ReleaseResult, WorkloadResult, WorkloadStatus};
