mod exec_credential;
mod http_client;
mod kubernetes;
mod prelude;

pub use self::exec_credential::*;
pub use self::http_client::*;
pub use self::kubernetes::*;

pub trait InternalEvent: Sized {
    fn emit(self);

    fn name(&self) -> Option<&'static str> {
        None
    }
}

pub fn emit(event: impl InternalEvent) {
    event.emit();
}

#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::internal_events::emit($event)
    };
}
