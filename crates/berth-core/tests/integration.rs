use berth_core::{
    decorate, CoreError, Decorator, DecorationContext, Engine, ExtensionHandler, Plugins,
};
use berth_runtime::mock::{MemorySource, MockContainer, ModuleDescriptor};
use berth_runtime::{Container, HostProperties, ModuleState, SourceChain};
use berth_schema::{parse_manifest_str, ArtifactId, Extension, Manifest, ManifestBuilder};
use std::collections::BTreeMap;
use std::sync::Arc;

struct Host {
    mock: Arc<MockContainer>,
    container: Arc<dyn Container>,
    source: Arc<MemorySource>,
}

impl Host {
    fn started() -> Self {
        let mock = Arc::new(MockContainer::new());
        mock.init(&HostProperties::new()).unwrap();
        mock.start().unwrap();
        let container: Arc<dyn Container> = mock.clone();
        Self {
            mock,
            container,
            source: Arc::new(MemorySource::new("memory")),
        }
    }

    fn provide(&self, coordinate: &str, symbolic_name: &str) {
        self.source.insert_module(
            &id(coordinate),
            &ModuleDescriptor::new(symbolic_name),
        );
    }

    fn sources(&self) -> SourceChain {
        SourceChain::new().with(self.source.clone())
    }

    fn engine(&self) -> Engine {
        Engine::new(&self.container, self.sources())
    }
}

fn id(coordinate: &str) -> ArtifactId {
    coordinate.parse().unwrap()
}

fn manifest(json: &str) -> Manifest {
    parse_manifest_str(json).unwrap()
}

struct Identity;

impl Decorator for Identity {
    fn name(&self) -> &str {
        "identity"
    }

    fn decorate(
        &self,
        manifest: &Arc<Manifest>,
        _builder: &mut ManifestBuilder,
        _context: &mut DecorationContext<'_>,
    ) -> Result<Arc<Manifest>, CoreError> {
        Ok(Arc::clone(manifest))
    }
}

struct Rename(&'static str);

impl Decorator for Rename {
    fn name(&self) -> &str {
        "rename"
    }

    fn decorate(
        &self,
        _manifest: &Arc<Manifest>,
        builder: &mut ManifestBuilder,
        _context: &mut DecorationContext<'_>,
    ) -> Result<Arc<Manifest>, CoreError> {
        Ok(builder.set_id(id(self.0)).build())
    }
}

struct IdentityHandler;

impl ExtensionHandler for IdentityHandler {
    fn handle(
        &self,
        manifest: &Arc<Manifest>,
        _extension: &Extension,
        _builder: &mut ManifestBuilder,
        _context: &mut DecorationContext<'_>,
    ) -> Result<Arc<Manifest>, CoreError> {
        Ok(Arc::clone(manifest))
    }
}

#[test]
fn identity_decorators_and_handlers_leave_manifest_undecorated() {
    let input = Arc::new(manifest(
        r#"{
            "id": "org.example:feature:1.0",
            "modules": [{"id": "org.example:a:1.0"}],
            "extensions": {
                "notes": {"kind": "mandatory", "type": "text", "content": ["hello"]}
            }
        }"#,
    ));
    let decorators: Vec<Arc<dyn Decorator>> = vec![Arc::new(Identity), Arc::new(Identity)];
    let mut handlers: BTreeMap<String, Arc<dyn ExtensionHandler>> = BTreeMap::new();
    handlers.insert("notes".to_owned(), Arc::new(IdentityHandler));

    let decoration = decorate(
        Arc::clone(&input),
        &mut SourceChain::new(),
        &decorators,
        &handlers,
    )
    .unwrap();
    assert!(!decoration.decorated);
    assert!(Arc::ptr_eq(&decoration.manifest, &input));
}

#[test]
fn unknown_mandatory_extension_aborts_before_any_install() {
    let host = Host::started();
    host.provide("org.example:a:1.0", "org.example.a");
    let mut engine = host.engine();

    let err = engine
        .install(manifest(
            r#"{
                "id": "org.example:feature:1.0",
                "modules": [{"id": "org.example:a:1.0"}],
                "extensions": {
                    "licensing": {"kind": "mandatory", "type": "json", "content": {"seats": 3}}
                }
            }"#,
        ))
        .unwrap_err();
    assert!(matches!(err, CoreError::Abort(_)));
    assert_eq!(host.mock.module_count(), 0);
    assert!(engine.is_empty());
}

#[test]
fn unknown_optional_extension_is_ignored() {
    let host = Host::started();
    host.provide("org.example:a:1.0", "org.example.a");
    let mut engine = host.engine();

    let installed = engine
        .install(manifest(
            r#"{
                "id": "org.example:feature:1.0",
                "modules": [{"id": "org.example:a:1.0"}],
                "extensions": {
                    "notes": {"kind": "optional", "type": "text", "content": ["x"]}
                }
            }"#,
        ))
        .unwrap();
    assert_eq!(installed.modules.len(), 1);
}

#[test]
fn install_then_remove_leaves_engine_empty() {
    let host = Host::started();
    host.provide("org.example:a:1.0", "org.example.a");
    host.provide("org.example:b:1.0", "org.example.b");
    let mut engine = host.engine();

    engine
        .install(manifest(
            r#"{
                "id": "org.example:feature:1.0",
                "modules": [{"id": "org.example:a:1.0"}, {"id": "org.example:b:1.0"}]
            }"#,
        ))
        .unwrap();
    assert_eq!(host.mock.active_locations().len(), 2);

    let report = engine.remove(&id("org.example:feature:1.0")).unwrap();
    assert_eq!(report.uninstalled.len(), 2);
    assert!(report.retained.is_empty());
    assert!(engine.is_empty());
    assert_eq!(host.mock.module_count(), 0);

    let uninstalls: Vec<String> = host
        .mock
        .journal()
        .into_iter()
        .filter(|entry| entry.starts_with("uninstall "))
        .collect();
    assert_eq!(
        uninstalls,
        ["uninstall org.example:b:1.0", "uninstall org.example:a:1.0"]
    );
}

#[test]
fn shared_module_survives_removal_of_one_owner() {
    let host = Host::started();
    host.provide("org.example:shared:1.0", "org.example.shared");
    host.provide("org.example:x:1.0", "org.example.x");
    let mut engine = host.engine();

    engine
        .install(manifest(
            r#"{
                "id": "org.example:one:1.0",
                "modules": [{"id": "org.example:shared:1.0"}, {"id": "org.example:x:1.0"}]
            }"#,
        ))
        .unwrap();
    engine
        .install(manifest(
            r#"{"id": "org.example:two:1.0", "modules": [{"id": "org.example:shared:1.0"}]}"#,
        ))
        .unwrap();

    let shared = engine.module(&id("org.example:shared:1.0")).unwrap();
    assert_eq!(shared.owners.len(), 2);

    let report = engine.remove(&id("org.example:one:1.0")).unwrap();
    assert_eq!(report.uninstalled, [id("org.example:x:1.0")]);
    assert_eq!(report.retained, [id("org.example:shared:1.0")]);

    let shared = engine.module(&id("org.example:shared:1.0")).unwrap();
    assert_eq!(shared.owners, [id("org.example:two:1.0")]);
    let handle = shared.handle.clone().unwrap();
    assert_eq!(
        host.container.module_state(&handle).unwrap(),
        ModuleState::Active
    );
}

#[test]
fn identical_update_is_a_no_op() {
    let host = Host::started();
    host.provide("org.example:a:1.0", "org.example.a");
    let mut engine = host.engine();
    let json = r#"{"id": "org.example:feature:1.0", "modules": [{"id": "org.example:a:1.0"}]}"#;

    engine.install(manifest(json)).unwrap();
    let before = host.mock.journal();
    let updated = engine.update(manifest(json)).unwrap();

    assert_eq!(host.mock.journal(), before);
    assert_eq!(updated.modules.len(), 1);
    assert_eq!(engine.manifests().count(), 1);
}

#[test]
fn update_with_changed_modules_reinstalls() {
    let host = Host::started();
    host.provide("org.example:a:1.0", "org.example.a");
    host.provide("org.example:b:1.0", "org.example.b");
    let mut engine = host.engine();

    engine
        .install(manifest(
            r#"{"id": "org.example:feature:1.0", "modules": [{"id": "org.example:a:1.0"}]}"#,
        ))
        .unwrap();
    engine
        .update(manifest(
            r#"{"id": "org.example:feature:1.0", "modules": [{"id": "org.example:b:1.0"}]}"#,
        ))
        .unwrap();

    assert_eq!(host.mock.active_locations(), ["org.example:b:1.0"]);
    assert!(engine.module(&id("org.example:a:1.0")).is_none());
}

#[test]
fn modules_install_in_order_with_sole_owner() {
    let host = Host::started();
    for name in ["a", "b", "c"] {
        host.provide(&format!("org.example:{name}:1.0"), &format!("org.example.{name}"));
    }
    let mut engine = host.engine();

    let installed = engine
        .install(manifest(
            r#"{
                "id": "org.example:feature:1.0",
                "modules": [
                    {"id": "org.example:a:1.0"},
                    {"id": "org.example:b:1.0"},
                    {"id": "org.example:c:1.0"}
                ]
            }"#,
        ))
        .unwrap();

    let installs: Vec<String> = host
        .mock
        .journal()
        .into_iter()
        .filter(|entry| entry.starts_with("install "))
        .collect();
    assert_eq!(
        installs,
        [
            "install org.example:a:1.0",
            "install org.example:b:1.0",
            "install org.example:c:1.0"
        ]
    );
    for module in &installed.modules {
        assert_eq!(module.owners, [id("org.example:feature:1.0")]);
        assert!(!module.is_external());
    }
}

#[test]
fn factory_configuration_is_substituted_and_written() {
    let host = Host::started();
    host.mock.publish_registry();
    let mut engine = host.engine();

    let installed = engine
        .install(manifest(
            r#"{
                "id": "org.example:feature:1.0",
                "configurations": {"org.example.pool~main": {"k": "${v}"}},
                "variables": {"v": "X"}
            }"#,
        ))
        .unwrap();

    let registry = host.mock.registry_handle();
    let properties = registry.properties("org.example.pool~main").unwrap();
    assert_eq!(properties["k"], "X");
    let record = installed.configurations[0].record.clone().unwrap();
    assert_eq!(record.factory_pid.as_deref(), Some("org.example.pool"));

    let report = engine.remove(&id("org.example:feature:1.0")).unwrap();
    assert_eq!(report.deleted_configurations.len(), 1);
    assert!(!registry.contains("org.example.pool~main"));
}

#[test]
fn shared_configuration_is_kept_until_last_owner_leaves() {
    let host = Host::started();
    host.mock.publish_registry();
    let mut engine = host.engine();
    for feature in ["one", "two"] {
        engine
            .install(manifest(&format!(
                r#"{{
                    "id": "org.example:{feature}:1.0",
                    "configurations": {{"org.example.log": {{"level": "info"}}}}
                }}"#
            )))
            .unwrap();
    }
    let registry = host.mock.registry_handle();

    engine.remove(&id("org.example:one:1.0")).unwrap();
    assert!(registry.contains("org.example.log"));
    engine.remove(&id("org.example:two:1.0")).unwrap();
    assert!(!registry.contains("org.example.log"));
}

#[test]
fn preexisting_module_is_never_uninstalled() {
    let host = Host::started();
    host.mock
        .preinstall("org.example:base:1.0", &ModuleDescriptor::new("org.example.base"))
        .unwrap();
    host.provide("org.example:base:1.0", "org.example.base");
    let mut engine = host.engine();

    let installed = engine
        .install(manifest(
            r#"{"id": "org.example:feature:1.0", "modules": [{"id": "org.example:base:1.0"}]}"#,
        ))
        .unwrap();
    assert!(installed.modules[0].is_external());

    engine.remove(&id("org.example:feature:1.0")).unwrap();
    assert!(host.mock.find_by_location("org.example:base:1.0").is_some());
}

#[test]
fn missing_artifact_is_reported() {
    let host = Host::started();
    let mut engine = host.engine();
    let err = engine
        .install(manifest(
            r#"{"id": "org.example:feature:1.0", "modules": [{"id": "org.example:ghost:1.0"}]}"#,
        ))
        .unwrap_err();
    assert!(matches!(err, CoreError::ArtifactNotFound(_)));
    assert!(engine.is_empty());
}

#[test]
fn interrupted_install_is_tracked_and_recoverable() {
    let host = Host::started();
    host.provide("org.example:a:1.0", "org.example.a");
    let mut engine = host.engine();
    let feature = r#"{
        "id": "org.example:feature:1.0",
        "modules": [{"id": "org.example:a:1.0"}, {"id": "org.example:b:1.0"}]
    }"#;

    let err = engine.install(manifest(feature)).unwrap_err();
    assert!(matches!(err, CoreError::ArtifactNotFound(_)));
    assert_eq!(engine.manifests().count(), 1);
    assert_eq!(host.mock.active_locations(), ["org.example:a:1.0"]);
    let partial = engine.installed(&id("org.example:feature:1.0")).unwrap();
    assert_eq!(partial.modules.len(), 1);

    host.provide("org.example:b:1.0", "org.example.b");
    let installed = engine.install(manifest(feature)).unwrap();
    assert_eq!(installed.modules.len(), 2);
    let mut active = host.mock.active_locations();
    active.sort();
    assert_eq!(active, ["org.example:a:1.0", "org.example:b:1.0"]);

    engine.remove(&id("org.example:feature:1.0")).unwrap();
    assert!(engine.is_empty());
    assert_eq!(host.mock.module_count(), 0);
}

#[test]
fn interrupted_install_can_be_removed() {
    let host = Host::started();
    host.provide("org.example:a:1.0", "org.example.a");
    let mut engine = host.engine();

    engine
        .install(manifest(
            r#"{
                "id": "org.example:feature:1.0",
                "modules": [{"id": "org.example:a:1.0"}, {"id": "org.example:ghost:1.0"}]
            }"#,
        ))
        .unwrap_err();

    let report = engine.remove(&id("org.example:feature:1.0")).unwrap();
    assert_eq!(report.uninstalled, [id("org.example:a:1.0")]);
    assert!(engine.is_empty());
    assert_eq!(host.mock.module_count(), 0);
}

#[test]
fn refused_uninstall_stays_tracked() {
    let host = Host::started();
    host.provide("org.example:a:1.0", "org.example.a");
    let mut engine = host.engine();
    engine
        .install(manifest(
            r#"{"id": "org.example:one:1.0", "modules": [{"id": "org.example:a:1.0"}]}"#,
        ))
        .unwrap();
    host.mock.fail_uninstall("org.example:a:1.0");

    let report = engine.remove(&id("org.example:one:1.0")).unwrap();
    assert!(report.uninstalled.is_empty());
    assert_eq!(report.failed, [id("org.example:a:1.0")]);
    assert!(!engine.is_empty());
    assert!(engine.module(&id("org.example:a:1.0")).is_some());
    assert!(host.mock.find_by_location("org.example:a:1.0").is_some());
    assert!(host.mock.active_locations().is_empty());

    engine
        .install(manifest(
            r#"{"id": "org.example:two:1.0", "modules": [{"id": "org.example:a:1.0"}]}"#,
        ))
        .unwrap();
    let module = engine.module(&id("org.example:a:1.0")).unwrap();
    assert_eq!(module.owners, [id("org.example:two:1.0")]);
    assert_eq!(host.mock.active_locations(), ["org.example:a:1.0"]);
}

#[test]
fn decoration_may_not_change_the_coordinate() {
    let host = Host::started();
    host.provide("org.example:a:1.0", "org.example.a");
    let mut engine = host.engine();
    let plugins = Plugins::new().with_decorator(Arc::new(Rename("org.example:other:1.0")));

    let err = engine
        .install_with(
            manifest(
                r#"{"id": "org.example:feature:1.0", "modules": [{"id": "org.example:a:1.0"}]}"#,
            ),
            &plugins,
        )
        .unwrap_err();
    assert!(matches!(&err, CoreError::Abort(reason) if reason.contains("coordinate")));
    assert!(engine.is_empty());
    assert_eq!(host.mock.module_count(), 0);
}

#[test]
fn removing_unknown_manifest_fails() {
    let host = Host::started();
    let mut engine = host.engine();
    assert!(matches!(
        engine.remove(&id("org.example:nothing:1.0")),
        Err(CoreError::ManifestNotFound(_))
    ));
}

#[test]
fn plugins_are_consulted_on_install() {
    let host = Host::started();
    host.provide("org.example:a:1.0", "org.example.a");
    let mut engine = host.engine();
    let plugins = Plugins::new().with_handler("notes", Arc::new(IdentityHandler));

    let installed = engine
        .install_with(
            manifest(
                r#"{
                    "id": "org.example:feature:1.0",
                    "modules": [{"id": "org.example:a:1.0"}],
                    "extensions": {
                        "notes": {"kind": "mandatory", "type": "text", "content": ["x"]}
                    }
                }"#,
            ),
            &plugins,
        )
        .unwrap();
    assert!(!installed.decorated);
    assert_eq!(installed.modules.len(), 1);
}
