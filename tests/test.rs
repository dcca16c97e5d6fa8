//! Black-box tests against real `javac`+`d8`-compiled classes, in the
//! teacher's own style (`TestBuilder` drives an external toolchain to
//! produce a real `classes.dex`). Where the teacher asserted against
//! `dex::Dex`'s flat accessor API, these assert against
//! `jitdex::VirtualMachine`'s graphs instead.
use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;

use petgraph::graph::NodeIndex;
use tempfile::TempDir;

use jitdex::access_flags::{ClassAccessFlags, FieldAccessFlags, MethodAccessFlags};
use jitdex::analysis::cha_call_graph;
use jitdex::vm::{VirtualMachine, VmConfig};
use jitdex::{JvmTypeHandle, DexString};

struct TestBuilder {
    root: TempDir,
    sources: Vec<PathBuf>,
}

impl TestBuilder {
    pub fn new() -> Self {
        Self {
            root: TempDir::new().expect("cannot create temporary directory"),
            sources: Vec::new(),
        }
    }

    pub fn add_src<P: AsRef<Path>>(&mut self, path: P, code: &str) {
        let dest = self.root.path().join(path);
        fs::write(&dest, code).expect("unable to write source");
        self.sources.push(dest);
    }

    fn get_class_names(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter_map(|p| {
                let filename = p.to_str().unwrap();
                filename
                    .ends_with(".java")
                    .then(|| filename.trim_end_matches(".java").to_owned() + ".class")
            })
            .collect()
    }

    fn compile(&self) -> PathBuf {
        let _javac = Command::new("javac")
            .args(&self.sources)
            .current_dir(self.root.path())
            .status()
            .expect("javac failed");
        let classes = self.get_class_names();
        assert!(!classes.is_empty());
        let _d8 = Command::new("d8")
            .args(&classes)
            .args(["--output", &self.root.path().display().to_string()])
            .current_dir(self.root.path())
            .status()
            .expect("d8 failed");
        self.root.path().join("classes.dex")
    }
}

macro_rules! assert_has_access_flags {
    ($flags_ty:ident, $bits:expr, [ $($flag:ident),+ ]) => {
        $(
            assert!(
                $flags_ty::from_bits_truncate($bits).contains($flags_ty::$flag),
                "expected {} to be set in {:#x}",
                stringify!($flag),
                $bits
            );
        )*
    };
}

fn load(dex_path: &Path) -> (VirtualMachine, jitdex::DexFileHandle) {
    let mut vm = VirtualMachine::new(VmConfig::default());
    let loader = vm.add_loader(&[]);
    let file = vm.add_file(loader, dex_path).expect("loading classes.dex");
    (vm, file)
}

fn find(vm: &mut VirtualMachine, loader: jitdex::ClassLoaderHandle, descriptor: &str) -> NodeIndex {
    let jvm = JvmTypeHandle::new(loader, DexString::from(descriptor));
    vm.find_class(&jvm, true)
        .unwrap_or_else(|e| panic!("class {} not found: {}", descriptor, e))
}

#[test]
fn loads_classes_dex() {
    let mut builder = TestBuilder::new();
    builder.add_src(
        "Main.java",
        r#"
            class Main {
                public static void main(String[] args) {
                    System.out.println("1 + 1 = " + 1 + 1);
                }
            }
        "#,
    );
    let dex_path = builder.compile();
    let (vm, _) = load(&dex_path);
    assert!(vm.class_graph().node_count() >= 1);
}

#[test]
fn find_class_by_descriptor() {
    let mut builder = TestBuilder::new();
    builder.add_src("Main.java", "class Main {}");
    builder.add_src(
        "Day.java",
        r#"
            public enum Day {
                SUNDAY, MONDAY, TUESDAY, WEDNESDAY, THURSDAY, FRIDAY, SATURDAY
            }
        "#,
    );
    builder.add_src("SuperClass.java", "class SuperClass {}");
    builder.add_src(
        "MyInterface.java",
        r#"
            interface MyInterface {
                String interfaceMethod(int x, String y);
            }
        "#,
    );
    let dex_path = builder.compile();
    let (mut vm, file) = load(&dex_path);

    let interface = find(&mut vm, file.loader, "LMyInterface;");
    assert_has_access_flags!(ClassAccessFlags, vm.class(interface).access_flags, [INTERFACE]);

    let day = find(&mut vm, file.loader, "LDay;");
    assert_has_access_flags!(ClassAccessFlags, vm.class(day).access_flags, [ENUM]);

    let main = find(&mut vm, file.loader, "LMain;");
    assert!(vm.class(main).access_flags & ClassAccessFlags::INTERFACE.bits() == 0);
}

#[test]
fn fields_inherit_access_flags_and_count() {
    let mut builder = TestBuilder::new();
    builder.add_src(
        "Main.java",
        r#"
            class Main {
                public static int staticVar = 42;
                final double finalVar = 32.0d;
                private String privateField;
                public String publicField;
                protected String protectedField;
                int[] arrayField;
            }
        "#,
    );
    let dex_path = builder.compile();
    let (mut vm, file) = load(&dex_path);
    let main = find(&mut vm, file.loader, "LMain;");
    let class = vm.class(main);
    assert_eq!(class.static_fields.len(), 1);
    assert_eq!(class.instance_fields.len(), 5);

    let field_named = |vm: &VirtualMachine, name: &str| -> NodeIndex {
        class
            .instance_fields
            .iter()
            .chain(class.static_fields.iter())
            .copied()
            .find(|&f| vm.field(f).name.as_str() == name)
            .unwrap_or_else(|| panic!("field {} not found", name))
    };

    let static_var = field_named(&vm, "staticVar");
    assert!(vm.field(static_var).is_static);
    assert_has_access_flags!(
        FieldAccessFlags,
        vm.field(static_var).access_flags,
        [STATIC, PUBLIC]
    );

    let private_field = field_named(&vm, "privateField");
    assert_has_access_flags!(FieldAccessFlags, vm.field(private_field).access_flags, [PRIVATE]);
    assert_eq!(vm.field(private_field).type_descriptor.as_str(), "Ljava/lang/String;");

    let array_field = field_named(&vm, "arrayField");
    assert_eq!(vm.field(array_field).type_descriptor.as_str(), "[I");
}

#[test]
fn methods_split_direct_and_virtual() {
    let mut builder = TestBuilder::new();
    builder.add_src(
        "SuperClass.java",
        r#"
            class SuperClass {
                int superMethod(String x) { return 1; }
            }
        "#,
    );
    builder.add_src(
        "Main.java",
        r#"
            class Main extends SuperClass {
                Main() {}
                static void staticMethod() {}
                @Override int superMethod(String y) { return 2; }
                private void privateMethod() {}
            }
        "#,
    );
    let dex_path = builder.compile();
    let (mut vm, file) = load(&dex_path);
    let main = find(&mut vm, file.loader, "LMain;");
    let class = vm.class(main);

    let has_named = |table: &[NodeIndex], name: &str| {
        table.iter().any(|&m| vm.method(m).name.as_str() == name)
    };
    assert!(has_named(&class.dtable, "<init>"));
    assert!(has_named(&class.dtable, "staticMethod"));
    assert!(has_named(&class.dtable, "privateMethod"));
    assert!(has_named(&class.vtable, "superMethod"));

    // overriding replaces the superclass's vtable slot rather than
    // appending a second entry
    let super_method_slots = class
        .vtable
        .iter()
        .filter(|&&m| vm.method(m).name.as_str() == "superMethod")
        .count();
    assert_eq!(super_method_slots, 1);
    let super_method = *class
        .vtable
        .iter()
        .find(|&&m| vm.method(m).name.as_str() == "superMethod")
        .unwrap();
    assert_eq!(vm.method(super_method).owner_class, main);
}

#[test]
fn access_flags_cover_method_modifiers() {
    let mut builder = TestBuilder::new();
    builder.add_src(
        "Main.java",
        r#"
            abstract class Main {
                public native String nativeMethod(int x);
                abstract int abstractMethod(int x);
                synchronized int synchronizedMethod(int y) { return 1; }
            }
        "#,
    );
    let dex_path = builder.compile();
    let (mut vm, file) = load(&dex_path);
    let main = find(&mut vm, file.loader, "LMain;");
    let class = vm.class(main);

    let method_named = |name: &str| -> NodeIndex {
        class
            .dtable
            .iter()
            .chain(class.vtable.iter())
            .copied()
            .find(|&m| vm.method(m).name.as_str() == name)
            .unwrap_or_else(|| panic!("method {} not found", name))
    };

    let native = method_named("nativeMethod");
    assert_has_access_flags!(MethodAccessFlags, vm.method(native).access_flags, [PUBLIC, NATIVE]);
    assert!(vm.method(native).insn_graph.is_none());

    let abstract_method = method_named("abstractMethod");
    assert_has_access_flags!(MethodAccessFlags, vm.method(abstract_method).access_flags, [ABSTRACT]);
    assert!(vm.method(abstract_method).insn_graph.is_none());

    let synchronized = method_named("synchronizedMethod");
    assert_has_access_flags!(
        MethodAccessFlags,
        vm.method(synchronized).access_flags,
        [DECLARED_SYNCHRONIZED]
    );
    assert!(vm.method(synchronized).insn_graph.is_some());
}

#[test]
fn insn_graph_has_single_entry_and_exit() {
    let mut builder = TestBuilder::new();
    builder.add_src(
        "Main.java",
        r#"
            class Main {
                static int branchy(int x) {
                    if (x > 0) {
                        return 1;
                    }
                    return 0;
                }
            }
        "#,
    );
    let dex_path = builder.compile();
    let (mut vm, file) = load(&dex_path);
    let main = find(&mut vm, file.loader, "LMain;");
    let class = vm.class(main);
    let method = *class
        .dtable
        .iter()
        .find(|&&m| vm.method(m).name.as_str() == "branchy")
        .expect("branchy not found");
    let graph = vm.method(method).insn_graph.as_ref().expect("has code");
    // two basic blocks (the branch and the fallthrough) both flow into exit
    assert!(graph.graph().node_count() >= 3);
    assert_ne!(graph.entry(), graph.exit());
}

#[test]
fn is_superclass_of_walks_the_hierarchy() {
    let mut builder = TestBuilder::new();
    builder.add_src("GrandParent.java", "class GrandParent {}");
    builder.add_src("Parent.java", "class Parent extends GrandParent {}");
    builder.add_src("Child.java", "class Child extends Parent {}");
    let dex_path = builder.compile();
    let (mut vm, file) = load(&dex_path);
    let grandparent = find(&mut vm, file.loader, "LGrandParent;");
    let parent = find(&mut vm, file.loader, "LParent;");
    let child = find(&mut vm, file.loader, "LChild;");

    assert!(vm.is_superclass_of(grandparent, child));
    assert!(vm.is_superclass_of(parent, child));
    assert!(vm.is_superclass_of(grandparent, parent));
    assert!(!vm.is_superclass_of(child, parent));
    assert!(!vm.is_superclass_of(parent, grandparent));
}

#[test]
fn cha_call_graph_resolves_a_direct_call() {
    let mut builder = TestBuilder::new();
    builder.add_src(
        "Main.java",
        r#"
            class Main {
                static void callee() {}
                static void caller() {
                    callee();
                }
            }
        "#,
    );
    let dex_path = builder.compile();
    let (mut vm, file) = load(&dex_path);
    let main = find(&mut vm, file.loader, "LMain;");
    let class = vm.class(main);
    let caller = *class
        .dtable
        .iter()
        .find(|&&m| vm.method(m).name.as_str() == "caller")
        .expect("caller not found");
    let callee = *class
        .dtable
        .iter()
        .find(|&&m| vm.method(m).name.as_str() == "callee")
        .expect("callee not found");

    cha_call_graph::build(&mut vm, &[caller]).expect("cha build");
    assert!(vm.method_graph().contains_edge(caller, callee));
}
