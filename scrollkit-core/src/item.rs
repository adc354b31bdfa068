/// Contract every item payload must satisfy.
///
/// The engine treats payloads as opaque except for the stable string id used
/// for identity. Two items are the same item exactly when their ids are
/// equal; all other fields are only ever touched by user-supplied
/// normalize/transform/validate hooks.
pub trait HasId {
    fn id(&self) -> &str;
}

impl<T: HasId + ?Sized> HasId for std::sync::Arc<T> {
    fn id(&self) -> &str {
        (**self).id()
    }
}

impl<T: HasId + ?Sized> HasId for Box<T> {
    fn id(&self) -> &str {
        (**self).id()
    }
}
