use crate::address::{ObjectId, ObjectKind};
use crate::debug;
use crate::error::Result;
use crate::protocol;
use crate::values::PayloadValue;
use ahash::AHashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use tokio::sync::{broadcast, mpsc};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// A property change observed on a sharing object, delivered to local
/// subscribers in arrival order.
#[derive(Debug, Clone)]
pub struct PropertyEvent {
    pub object: ObjectId,
    pub name: String,
    pub value: PayloadValue,
}

/// An outbound property write headed for the transport layer.
#[derive(Debug, Clone)]
pub struct PropertyUpdate {
    pub key: String,
    pub value: PayloadValue,
}

/// Runtime node bound to one `ObjectId`.
///
/// Roots own their children; children keep only a weak reference back, so a
/// released root takes its subtree with it.
pub struct SharingObject {
    id: ObjectId,
    properties: RwLock<AHashMap<String, PayloadValue>>,
    children: Mutex<Vec<Arc<SharingObject>>>,
    root: Weak<SharingObject>,
    outbound: mpsc::UnboundedSender<PropertyUpdate>,
    events: broadcast::Sender<PropertyEvent>,
}

impl SharingObject {
    fn new(
        id: ObjectId,
        root: Weak<SharingObject>,
        outbound: mpsc::UnboundedSender<PropertyUpdate>,
    ) -> Arc<SharingObject> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(SharingObject {
            id,
            properties: RwLock::new(AHashMap::new()),
            children: Mutex::new(Vec::new()),
            root,
            outbound,
            events,
        })
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn is_root(&self) -> bool {
        self.id.is_root()
    }

    pub fn root(&self) -> Option<Arc<SharingObject>> {
        self.root.upgrade()
    }

    pub fn property(&self, name: &str) -> Option<PayloadValue> {
        read_lock(&self.properties).get(name).cloned()
    }

    /// Shallow snapshot of the current property map.
    pub fn properties(&self) -> AHashMap<String, PayloadValue> {
        read_lock(&self.properties).clone()
    }

    pub fn children(&self) -> Vec<Arc<SharingObject>> {
        mutex_lock(&self.children).clone()
    }

    /// Subscribes to property changes. The returned snapshot reflects the
    /// state at subscription time; events received afterwards are deltas on
    /// top of it.
    ///
    /// Events arrive in order. A subscriber that falls more than the channel
    /// capacity behind observes `RecvError::Lagged` and misses the
    /// overwritten events; the property map itself is always current, so a
    /// lagged subscriber recovers by re-reading `properties`.
    pub fn subscribe(
        &self,
    ) -> (
        broadcast::Receiver<PropertyEvent>,
        AHashMap<String, PayloadValue>,
    ) {
        // Snapshot under the same lock discipline as the event path so no
        // change can fall between the snapshot and the subscription.
        let properties = read_lock(&self.properties).clone();
        (self.events.subscribe(), properties)
    }

    /// Local write: records the value, notifies subscribers, and forwards
    /// the encoded key to the transport.
    pub fn set_property(&self, name: &str, value: PayloadValue) {
        write_lock(&self.properties).insert(name.to_string(), value.clone());

        let key = protocol::encode_property_key(&self.id.encode(), name);
        debug::trace_property(&key, &value);
        let _ = self.outbound.send(PropertyUpdate { key, value: value.clone() });

        self.broadcast(name, value);
    }

    pub fn set_properties<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (String, PayloadValue)>,
    {
        for (name, value) in entries {
            self.set_property(&name, value);
        }
    }

    /// Inbound path: a change already accepted by the transport. Updates the
    /// map and notifies subscribers without echoing back out.
    pub fn notify_property_changed(&self, name: &str, value: PayloadValue) {
        write_lock(&self.properties).insert(name.to_string(), value.clone());
        self.broadcast(name, value);
    }

    fn broadcast(&self, name: &str, value: PayloadValue) {
        let event = PropertyEvent {
            object: self.id.clone(),
            name: name.to_string(),
            value,
        };

        let _ = self.events.send(event.clone());

        // Child changes are visible on the root as well.
        if let Some(root) = self.root.upgrade() {
            let _ = root.events.send(event);
        }
    }

    fn adopt_child(&self, child: Arc<SharingObject>) {
        let mut children = mutex_lock(&self.children);
        if !children.iter().any(|c| c.id == child.id) {
            children.push(child);
        }
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn mutex_lock<T>(lock: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-wide cache from encoded id to live object.
///
/// Entries are weak: equal encoded keys yield the same `Arc` while any
/// strong reference is live, and slots are reclaimed once the last one goes.
pub struct ObjectCache {
    inner: RwLock<AHashMap<String, Weak<SharingObject>>>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(AHashMap::new()),
        }
    }

    pub fn try_get(&self, key: &str) -> Option<Arc<SharingObject>> {
        {
            let map = read_lock(&self.inner);
            match map.get(key) {
                Some(weak) => {
                    if let Some(live) = weak.upgrade() {
                        return Some(live);
                    }
                }
                None => return None,
            }
        }

        // The entry was dead; prune it on the way out.
        write_lock(&self.inner).remove(key);
        None
    }

    pub fn get_or_create<F>(&self, key: &str, factory: F) -> Arc<SharingObject>
    where
        F: FnOnce() -> Arc<SharingObject>,
    {
        let mut map = write_lock(&self.inner);
        if let Some(live) = map.get(key).and_then(Weak::upgrade) {
            return live;
        }
        let created = factory();
        map.insert(key.to_string(), Arc::downgrade(&created));
        created
    }

    pub fn remove(&self, key: &str) {
        write_lock(&self.inner).remove(key);
    }

    pub fn prune(&self) {
        write_lock(&self.inner).retain(|_, weak| weak.strong_count() > 0);
    }

    pub fn live_count(&self) -> usize {
        read_lock(&self.inner)
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

impl Default for ObjectCache {
    fn default() -> Self {
        Self::new()
    }
}

/// The set of sharing objects known to this process, plus the outbound
/// channel toward the transport.
pub struct SharingSpace {
    cache: ObjectCache,
    roots: Mutex<Vec<Arc<SharingObject>>>,
    outbound: mpsc::UnboundedSender<PropertyUpdate>,
}

impl SharingSpace {
    pub fn new() -> (Arc<SharingSpace>, mpsc::UnboundedReceiver<PropertyUpdate>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let space = Arc::new(SharingSpace {
            cache: ObjectCache::new(),
            roots: Mutex::new(Vec::new()),
            outbound,
        });
        (space, outbound_rx)
    }

    /// Creates or returns the root object for `(kind, label)`. An empty
    /// label auto-generates one.
    pub fn create_root(&self, kind: ObjectKind, label: &str) -> Arc<SharingObject> {
        let id = ObjectId::new(kind, label);
        self.root_for(id)
    }

    fn root_for(&self, id: ObjectId) -> Arc<SharingObject> {
        let key = id.encode();
        let outbound = self.outbound.clone();
        let object = self
            .cache
            .get_or_create(&key, || SharingObject::new(id, Weak::new(), outbound));

        let mut roots = mutex_lock(&self.roots);
        if !roots.iter().any(|r| r.id() == object.id()) {
            roots.push(object.clone());
        }
        object
    }

    /// Resolves an id to its live object, creating the root and any missing
    /// intermediate children along the address path.
    pub fn resolve(&self, id: &ObjectId) -> Arc<SharingObject> {
        let root = self.root_for(id.root_id());
        if id.is_root() {
            return root;
        }

        let mut current = root;
        for index in id.address.clone() {
            current = self.child_of(&current, index);
        }
        current
    }

    /// Child lookup with the referential-identity guarantee: repeated calls
    /// for the same address return the same instance while it is live.
    pub fn child_of(&self, parent: &Arc<SharingObject>, index: u32) -> Arc<SharingObject> {
        let child_id = parent.id().child_id(index);
        let key = child_id.encode();

        let root = parent.root().unwrap_or_else(|| parent.clone());
        let root_weak = Arc::downgrade(&root);
        let outbound = self.outbound.clone();

        let child = self
            .cache
            .get_or_create(&key, || SharingObject::new(child_id, root_weak, outbound));
        parent.adopt_child(child.clone());
        child
    }

    pub fn try_get(&self, id: &ObjectId) -> Option<Arc<SharingObject>> {
        self.cache.try_get(&id.encode())
    }

    pub fn roots(&self) -> Vec<Arc<SharingObject>> {
        mutex_lock(&self.roots).clone()
    }

    /// Drops the object from the cache and releases the strong root
    /// reference; its subtree goes with it once callers let go.
    pub fn remove(&self, id: &ObjectId) {
        self.cache.remove(&id.encode());
        mutex_lock(&self.roots).retain(|root| root.id() != id);
    }

    pub fn cache(&self) -> &ObjectCache {
        &self.cache
    }

    /// Inbound property change from the transport. Malformed keys are
    /// reported as errors the caller drops; they never panic.
    pub fn handle_property_changed(&self, key: &str, value: PayloadValue) -> Result<()> {
        let (object_key, property) = protocol::decode_property_key(key)?;
        let id = ObjectId::decode(object_key)?;
        let object = self.resolve(&id);
        object.notify_property_changed(property, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_space() -> (Arc<SharingSpace>, mpsc::UnboundedReceiver<PropertyUpdate>) {
        SharingSpace::new()
    }

    #[test]
    fn test_cache_referential_identity() {
        let (space, _rx) = test_space();

        let first = space.create_root(ObjectKind::Static, "table");
        let second = space.create_root(ObjectKind::Static, "table");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_cache_reclaims_released_objects() {
        let (space, _rx) = test_space();

        let first = space.create_root(ObjectKind::Dynamic, "lamp");
        let first_ptr = Arc::as_ptr(&first);

        space.remove(first.id());
        drop(first);
        assert_eq!(space.cache().live_count(), 0);

        let second = space.create_root(ObjectKind::Dynamic, "lamp");
        // A fresh instance, not the reclaimed one by identity guarantee.
        assert_eq!(space.cache().live_count(), 1);
        let _ = first_ptr;
        drop(second);
    }

    #[test]
    fn test_child_identity_shared() {
        let (space, _rx) = test_space();

        let root = space.create_root(ObjectKind::Static, "board");
        let a = space.child_of(&root, 3);
        let b = space.child_of(&root, 3);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(root.children().len(), 1);

        let c = space.child_of(&root, 4);
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(root.children().len(), 2);
    }

    #[test]
    fn test_child_address_extends_root() {
        let (space, _rx) = test_space();

        let root = space.create_root(ObjectKind::Static, "board");
        let child = space.child_of(&root, 1);
        let grandchild = space.child_of(&child, 0);

        assert!(root.id().is_ancestor_of(child.id()));
        assert!(root.id().is_ancestor_of(grandchild.id()));
        assert_eq!(grandchild.root().unwrap().id(), root.id());
    }

    #[test]
    fn test_resolve_builds_path() {
        let (space, _rx) = test_space();

        let id = ObjectId::new(ObjectKind::Static, "rig").child_id(0).child_id(2);
        let object = space.resolve(&id);
        assert_eq!(object.id(), &id);

        let root = space.try_get(&id.root_id()).unwrap();
        assert_eq!(root.children().len(), 1);
    }

    #[test]
    fn test_set_property_forwards_to_outbound() {
        let (space, mut rx) = test_space();

        let object = space.create_root(ObjectKind::Dynamic, "abc123");
        object.set_property("health", PayloadValue::Float(3.5));

        let update = rx.try_recv().unwrap();
        assert_eq!(update.key, "1.abc123.health");
        assert_eq!(update.value, PayloadValue::Float(3.5));
        assert_eq!(object.property("health"), Some(PayloadValue::Float(3.5)));
    }

    #[test]
    fn test_notify_does_not_echo_outbound() {
        let (space, mut rx) = test_space();

        let object = space.create_root(ObjectKind::Dynamic, "abc123");
        object.notify_property_changed("health", PayloadValue::Float(1.0));

        assert!(rx.try_recv().is_err());
        assert_eq!(object.property("health"), Some(PayloadValue::Float(1.0)));
    }

    #[test]
    fn test_subscribe_snapshot_and_events() {
        let (space, _rx) = test_space();

        let object = space.create_root(ObjectKind::Static, "room");
        object.set_property("color", PayloadValue::String("red".to_string()));

        let (mut events, snapshot) = object.subscribe();
        assert_eq!(
            snapshot.get("color"),
            Some(&PayloadValue::String("red".to_string()))
        );

        object.notify_property_changed("color", PayloadValue::String("blue".to_string()));
        let event = events.try_recv().unwrap();
        assert_eq!(event.name, "color");
        assert_eq!(event.value, PayloadValue::String("blue".to_string()));
    }

    #[test]
    fn test_subscriber_receives_burst_in_order() {
        let (space, _rx) = test_space();

        let object = space.create_root(ObjectKind::Static, "counter");
        let (mut events, _) = object.subscribe();

        for i in 0..200 {
            object.notify_property_changed("value", PayloadValue::Int(i));
        }

        // A burst well past the old per-frame volume is buffered whole,
        // in order, with nothing dropped.
        for i in 0..200 {
            let event = events.try_recv().unwrap();
            assert_eq!(event.value, PayloadValue::Int(i));
        }
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_child_events_reach_root() {
        let (space, _rx) = test_space();

        let root = space.create_root(ObjectKind::Static, "board");
        let child = space.child_of(&root, 0);

        let (mut root_events, _) = root.subscribe();
        child.notify_property_changed("flipped", PayloadValue::Boolean(true));

        let event = root_events.try_recv().unwrap();
        assert_eq!(event.object, *child.id());
        assert_eq!(event.name, "flipped");
    }

    #[test]
    fn test_handle_property_changed_inbound() {
        let (space, _rx) = test_space();

        space
            .handle_property_changed("1.abc123.health", PayloadValue::Float(2.0))
            .unwrap();

        let id = ObjectId::decode("1.abc123").unwrap();
        let object = space.try_get(&id).unwrap();
        assert_eq!(object.property("health"), Some(PayloadValue::Float(2.0)));
    }

    #[test]
    fn test_handle_property_changed_malformed_key() {
        let (space, _rx) = test_space();

        assert!(space
            .handle_property_changed("garbage", PayloadValue::Boolean(true))
            .is_err());
        assert!(space
            .handle_property_changed("x.label.health", PayloadValue::Boolean(true))
            .is_err());
    }
}
