//! Firmware transfer through a scoped programmer session.
//!
//! Socket preparation (power, settle delay, SWD routing) followed by an open
//! session in which the target is configured, optionally erased, loaded with
//! one or more images and restarted. Once `open` succeeded, `close` is issued
//! on every exit path.

use std::time::Duration;

use super::executor::call;
use crate::bench::{HwResult, PairHandles, ProgrammerLink};
use crate::config::{BenchSettings, ImageSpec};
use crate::models::SocketIndex;

/// An open programmer session. Close it with [`ProgrammerSession::close`].
pub struct ProgrammerSession<'a> {
    link: &'a mut dyn ProgrammerLink,
    timeout: Duration,
    open: bool,
}

impl<'a> ProgrammerSession<'a> {
    /// Select the transport and open a session.
    pub async fn open(link: &'a mut dyn ProgrammerLink, timeout: Duration) -> HwResult<ProgrammerSession<'a>> {
        call(timeout, "select_by_usb", link.select_by_usb()).await?;
        call(timeout, "open", link.open()).await?;
        Ok(ProgrammerSession {
            link,
            timeout,
            open: true,
        })
    }

    pub fn link(&mut self) -> &mut dyn ProgrammerLink {
        &mut *self.link
    }

    pub async fn close(mut self) -> HwResult<()> {
        self.open = false;
        call(self.timeout, "close", self.link.close()).await
    }
}

impl Drop for ProgrammerSession<'_> {
    fn drop(&mut self) {
        if self.open {
            log::error!(
                "[Programmer] Session on {} dropped while open; the programmer may need a manual reset",
                self.link.serial()
            );
        }
    }
}

/// Run `images` through an open session: configure, connect, erase, load, restart.
async fn transfer(session: &mut ProgrammerSession<'_>, settings: &BenchSettings, images: &[&ImageSpec]) -> HwResult<()> {
    let timeout = session.timeout;
    let link = session.link();

    call(timeout, "set_device", link.set_device(&settings.target_device)).await?;
    call(timeout, "select", link.select()).await?;
    call(timeout, "set_speed", link.set_speed(settings.swd_speed_khz)).await?;
    call(timeout, "connect", link.connect()).await?;

    if settings.erase_before_download {
        call(timeout, "erase", link.erase()).await?;
    }

    for image in images {
        call(timeout, "download_file", link.download_file(&image.path, image.offset)).await?;
    }

    call(timeout, "reset", link.reset()).await?;
    call(timeout, "go", link.go()).await?;
    Ok(())
}

/// Power the socket, wait for it to settle, route SWD and flash `images`.
pub async fn program_socket(
    handles: &mut PairHandles,
    settings: &BenchSettings,
    socket: SocketIndex,
    images: &[&ImageSpec],
) -> HwResult<()> {
    let timeout = settings.call_timeout();

    call(timeout, "power_on", handles.fixture.power_on(socket)).await?;
    tokio::time::sleep(settings.settle_delay()).await;
    call(timeout, "route_debug_lines", handles.fixture.route_debug_lines(socket)).await?;

    let mut session = ProgrammerSession::open(handles.programmer.as_mut(), timeout).await?;
    let outcome = transfer(&mut session, settings, images).await;
    let closed = session.close().await;

    outcome.and(closed)
}
