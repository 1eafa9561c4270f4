/*! Utilities for managing macOS hosts

`macos-utils` grows APFS containers into space added to their disk from outside, such as an enlarged cloud
volume. It breaks down into a few concepts:

* [`DiskUtil`](diskutil::DiskUtil): Inspects and modifies disks by driving `diskutil`, smoothing over the
  differences between macOS releases.
* [`resolve`](target::resolve): Turns what a user typed (`root`, `disk1`, `/dev/disk1`) into a disk.
* [`grow_container`](grow::grow_container): Repairs the disk backing a container, checks there is free space to
  grow into, and grows the container to its maximum size.

Wrapping a [`DiskUtil`](diskutil::DiskUtil) in a [`DryRun`](diskutil::DryRun) walks through the same decisions
without modifying anything:

```rust,no_run
use macos_utils::{command::Deadline, diskutil::{Diskutil, DryRun}, grow::grow_container, system, target};

# async fn dry_run_grow() -> color_eyre::Result<()> {
let product = system::scan()?;
let diskutil = DryRun::new(Diskutil::for_product(&product)?);
let deadline = Deadline::after(std::time::Duration::from_secs(300));

let disk = target::resolve(deadline, &diskutil, "root").await?;
match grow_container(deadline, &diskutil, Some(&disk)).await {
    Ok(()) => tracing::info!("Done"),
    Err(e) if e.is_benign() => tracing::info!("Nothing to grow into"),
    Err(e) => return Err(e.into()),
}
#
# Ok(())
# }
```
*/

#[cfg(feature = "cli")]
pub mod cli;
pub mod command;
pub mod diskutil;
mod error;
pub mod grow;
pub mod settings;
pub mod system;
pub mod target;

pub use error::MacosUtilsError;
