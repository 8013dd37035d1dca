//! Device awareness for copytask
//!
//! This crate supplies the engine's collaborators that depend on the machine
//! it runs on:
//!
//! - **Device classification**: configured path-prefix rules with a mount table fallback
//! - **Buffer sizing**: per-class chunk sizes, taking the smaller of source and destination
//! - **Free space**: `statvfs` based probing for the up-front space check
//!
//! # Examples
//!
//! ```rust
//! use copytask_device::{BufferAdvisor, PrefixDeviceResolver};
//! use copytask_types::{DeviceClass, DeviceResolver};
//! use std::path::Path;
//!
//! let resolver = PrefixDeviceResolver::new(DeviceClass::SSD).with_rule("/media", DeviceClass::USB2);
//! assert_eq!(resolver.resolve_device_class(Path::new("/media/stick")), DeviceClass::USB2);
//!
//! let advisor = BufferAdvisor::new();
//! let chunk = advisor.recommend_for_paths(&resolver, Path::new("/home/me"), Path::new("/media/stick"));
//! assert_eq!(chunk, 64 * 1024);
//! ```

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod advisor;
pub mod resolver;
pub mod space;

pub use advisor::BufferAdvisor;
pub use resolver::{find_mount, parse_mounts, MountEntry, PrefixDeviceResolver, SystemDeviceResolver};
pub use space::{required_with_margin, SystemSpaceProbe};
