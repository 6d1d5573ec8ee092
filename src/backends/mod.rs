// SPDX-License-Identifier: MPL-2.0

//! Backend abstraction layer for camera capture
//!
//! The pipeline only talks to [`camera::CameraSource`]. Platform camera
//! services plug in underneath through [`camera::CameraDriver`]; the
//! synthetic driver stands in for hardware in demos and tests.

pub mod camera;
