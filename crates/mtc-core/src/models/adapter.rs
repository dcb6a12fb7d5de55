/// A feeder that delivers raw values to a device's data items. The delivery
/// protocol lives outside this crate; the device only keeps a non-owning
/// handle to each adapter feeding it.
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;
}
