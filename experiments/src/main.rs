use std::time::SystemTime;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

use synapse::bumpalo::Bump;
use synapse::descriptor::{CharSet, MarshalAsDescriptor, MethodPolicy, NativeTypeTag, ParamAttributes};
use synapse::marshal::{generate_stub, Direction, MethodSignature};
use synapse::tokens::TableTokenResolver;
use synapse::types::{PrimitiveType, TypePool};

fn setup_global_subscriber() {
	let subscriber = Registry::default()
		.with(tracing_subscriber::fmt::layer().with_target(false));

	tracing::subscriber::set_global_default(subscriber).expect("Could not set global default");
}

fn main() {
	setup_global_subscriber();

	let bump = Bump::new();
	let pool: &TypePool = bump.alloc(TypePool::new(&bump));
	let known = pool.known();
	let int32 = pool.get_primitive(PrimitiveType::Int32);
	let void = pool.get_primitive(PrimitiveType::Void);
	let file_handle = pool.define_handle("Demo", "FileHandle");

	let mut signatures = Vec::new();

	// int Add(int a, int b)
	let mut add = MethodSignature::new(MethodPolicy::default(), int32, None);
	add.add_parameter(int32, ParamAttributes::empty(), None);
	add.add_parameter(int32, ParamAttributes::empty(), None);
	signatures.push(("int Add(int, int)", add));

	// void Next([Out] ref int value)
	let mut next = MethodSignature::new(MethodPolicy::default(), void, None);
	next.add_parameter(pool.get_by_ref(int32), ParamAttributes::OUT, None);
	signatures.push(("void Next([Out] ref int)", next));

	// string GetName()
	let get_name = MethodSignature::new(MethodPolicy::default(), known.string, None);
	signatures.push(("string GetName()", get_name));

	// void Print(string text), CharSet.Ansi
	let mut print = MethodSignature::new(MethodPolicy::with_char_set(CharSet::Ansi), void, None);
	print.add_parameter(known.string, ParamAttributes::empty(), None);
	signatures.push(("void Print(string) [Ansi]", print));

	// int Sum(int[] values)
	let mut sum = MethodSignature::new(MethodPolicy::default(), int32, None);
	sum.add_parameter(pool.get_array(int32), ParamAttributes::empty(), None);
	signatures.push(("int Sum(int[])", sum));

	// void Read(StringBuilder buffer)
	let mut read = MethodSignature::new(MethodPolicy::default(), void, None);
	read.add_parameter(known.string_builder, ParamAttributes::empty(), None);
	signatures.push(("void Read(StringBuilder)", read));

	// void Toggle([In, Out] bool[] flags, int count), SizeParamIndex = 1
	let mut flags_descriptor = MarshalAsDescriptor::new(NativeTypeTag::Array);
	flags_descriptor.size_param_index = Some(1);
	let mut toggle = MethodSignature::new(MethodPolicy::default(), void, None);
	toggle.add_parameter(
		pool.get_array(pool.get_primitive(PrimitiveType::Boolean)),
		ParamAttributes::IN | ParamAttributes::OUT,
		Some(flags_descriptor),
	);
	toggle.add_parameter(int32, ParamAttributes::empty(), None);
	signatures.push(("void Toggle([In, Out] bool[], int)", toggle));

	// void Close(FileHandle handle)
	let mut close = MethodSignature::new(MethodPolicy::default(), void, None);
	close.add_parameter(file_handle, ParamAttributes::empty(), None);
	signatures.push(("void Close(FileHandle)", close));

	let start = SystemTime::now();
	for (display, signature) in &signatures {
		let stub = generate_stub(pool, signature, Direction::Forward, Box::new(TableTokenResolver::new())).unwrap();
		println!("=== {display}");
		println!("marshalling:     {:?}", stub.streams().marshalling);
		println!("call site setup: {:?}", stub.streams().call_site_setup);
		println!("unmarshalling:   {:?}", stub.streams().unmarshalling);
		println!("cleanup:         {:?}", stub.streams().cleanup);
		println!("return value:    {:?}", stub.streams().return_value);
		println!("locals:          {:?}", stub.locals());
		println!();
	}

	println! {
		"Generated {} stubs in {:?}",
		signatures.len(),
		start.elapsed().unwrap(),
	}
}
