//! Process-wide platform state.

use std::rc::Rc;

use crate::event_loop::EventLoop;

static PLATFORM_IDENTIFIER: &str = "quickjs";

static PLATFORM_VERSION: &str = "2021-03-27";

/// Options fixed at platform creation.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformOptions {
    /// Allow [`Env::request_garbage_collection`](crate::env::Env) to force
    /// an engine collection pass.
    pub expose_garbage_collection: bool,
}

/// Process-wide holder of options and the host event loop. Several
/// environments may share one platform; the platform must outlive all of
/// them.
pub struct Platform {
    options: PlatformOptions,
    event_loop: Rc<dyn EventLoop>,
}

impl Platform {
    pub fn new(event_loop: Rc<dyn EventLoop>, options: PlatformOptions) -> Rc<Platform> {
        Rc::new(Platform {
            options,
            event_loop,
        })
    }

    /// The engine this backend embeds.
    pub fn identifier(&self) -> &'static str {
        PLATFORM_IDENTIFIER
    }

    pub fn version(&self) -> &'static str {
        PLATFORM_VERSION
    }

    pub fn event_loop(&self) -> Rc<dyn EventLoop> {
        self.event_loop.clone()
    }

    pub(crate) fn options(&self) -> &PlatformOptions {
        &self.options
    }
}
