#![forbid(unsafe_code)]

//! WGSL compile and link checks.
//!
//! Each stage is parsed and validated on its own with naga ("compile"). The
//! pair is then checked against the fixed program interface and against each
//! other ("link"): vertex attribute locations and types, inter-stage varyings,
//! the fragment output, and the group-0 binding layout including the byte
//! offsets of the frame uniform block.

use naga::{
    AddressSpace, Binding, ImageClass, ImageDimension, Module, Scalar, ScalarKind, TypeInner,
    VectorSize,
};

use super::ProgramFamily;
use crate::error::{ShaderError, ShaderStage};

/// Bind group every program uses.
pub const BIND_GROUP: u32 = 0;
pub const FRAME_UNIFORMS_BINDING: u32 = 0;
pub const TEXTURE_BINDING: u32 = 1;
pub const SAMPLER_BINDING: u32 = 2;

/// Members of the frame uniform block: (name, byte offset, width in floats).
pub const FRAME_UNIFORM_MEMBERS: [(&str, u32, u8); 4] = [
    ("resolution", 0, 2),
    ("time", 8, 1),
    ("intensity", 12, 1),
    ("speed", 16, 1),
];

/// Scene-pass attributes: (location, width in floats).
const SCENE_ATTRIBUTES: [(u32, u8); 4] = [(0, 2), (1, 2), (2, 4), (3, 4)];
const POST_ATTRIBUTES: [(u32, u8); 2] = [(0, 2), (1, 2)];

/// Resources a program actually declares, by binding slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniformBindings {
    /// Name of the frame uniform block variable.
    pub frame: Option<String>,
    /// Name of the texture bound to texture unit 0 (atlas or scene).
    pub texture: Option<String>,
    pub sampler: Option<String>,
}

impl UniformBindings {
    #[must_use]
    pub fn samples_texture(&self) -> bool {
        self.texture.is_some() && self.sampler.is_some()
    }
}

/// One compiled stage ready for pipeline creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSource {
    pub source: String,
    pub entry_point: String,
}

/// A program pair that passed compile and link checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedProgram {
    pub family: ProgramFamily,
    pub vertex: StageSource,
    pub fragment: StageSource,
    pub bindings: UniformBindings,
}

const F32: Scalar = Scalar {
    kind: ScalarKind::Float,
    width: 4,
};

/// Floating point vector (or scalar, width 1) with this many components.
type FloatShape = u8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Location(u32),
    Position,
    Other,
}

/// Compile both stages and link them for `family`.
pub fn validate_program(
    family: ProgramFamily,
    vertex_src: &str,
    fragment_src: &str,
) -> Result<ValidatedProgram, ShaderError> {
    let vs_module = compile(ShaderStage::Vertex, vertex_src)?;
    let fs_module = compile(ShaderStage::Fragment, fragment_src)?;

    let vs_entry = entry_point(&vs_module, ShaderStage::Vertex)?;
    let fs_entry = entry_point(&fs_module, ShaderStage::Fragment)?;

    check_vertex_inputs(family, &vs_module, vs_entry)?;
    check_varyings(&vs_module, vs_entry, &fs_module, fs_entry)?;
    check_fragment_output(&fs_module, fs_entry)?;

    let mut bindings = UniformBindings::default();
    collect_bindings(&vs_module, &mut bindings)?;
    collect_bindings(&fs_module, &mut bindings)?;

    Ok(ValidatedProgram {
        family,
        vertex: StageSource {
            source: vertex_src.to_string(),
            entry_point: vs_entry.name.clone(),
        },
        fragment: StageSource {
            source: fragment_src.to_string(),
            entry_point: fs_entry.name.clone(),
        },
        bindings,
    })
}

fn compile(stage: ShaderStage, src: &str) -> Result<Module, ShaderError> {
    let module = naga::front::wgsl::parse_str(src).map_err(|err| ShaderError::Compile {
        stage,
        diagnostic: err.emit_to_string(src),
    })?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::default(),
    )
    .validate(&module)
    .map_err(|err| ShaderError::Compile {
        stage,
        diagnostic: err.emit_to_string(src),
    })?;
    Ok(module)
}

fn entry_point(module: &Module, stage: ShaderStage) -> Result<&naga::EntryPoint, ShaderError> {
    let wanted = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
    };
    module
        .entry_points
        .iter()
        .find(|ep| ep.stage == wanted)
        .ok_or_else(|| ShaderError::Compile {
            stage,
            diagnostic: format!("no @{stage} entry point"),
        })
}

fn link_err(diagnostic: String) -> ShaderError {
    ShaderError::Link { diagnostic }
}

fn float_shape(inner: &TypeInner) -> Option<FloatShape> {
    match *inner {
        TypeInner::Scalar(F32) => Some(1),
        TypeInner::Vector { size, scalar: F32 } => Some(match size {
            VectorSize::Bi => 2,
            VectorSize::Tri => 3,
            VectorSize::Quad => 4,
        }),
        _ => None,
    }
}

fn describe(shape: Option<FloatShape>) -> String {
    match shape {
        Some(1) => "f32".to_string(),
        Some(n) => format!("vec{n}<f32>"),
        None => "non-float type".to_string(),
    }
}

/// Flatten an argument or result into (slot, shape) pairs, descending into
/// structs whose members carry the bindings.
fn flatten_io(
    module: &Module,
    ty: naga::Handle<naga::Type>,
    binding: Option<&Binding>,
    out: &mut Vec<(Slot, Option<FloatShape>)>,
) {
    let inner = &module.types[ty].inner;
    match binding {
        Some(Binding::Location { location, .. }) => {
            out.push((Slot::Location(*location), float_shape(inner)));
        }
        Some(Binding::BuiltIn(naga::BuiltIn::Position { .. })) => {
            out.push((Slot::Position, float_shape(inner)));
        }
        Some(Binding::BuiltIn(_)) => out.push((Slot::Other, None)),
        None => {
            if let TypeInner::Struct { members, .. } = inner {
                for member in members {
                    flatten_io(module, member.ty, member.binding.as_ref(), out);
                }
            }
        }
    }
}

fn inputs(module: &Module, ep: &naga::EntryPoint) -> Vec<(Slot, Option<FloatShape>)> {
    let mut out = Vec::new();
    for arg in &ep.function.arguments {
        flatten_io(module, arg.ty, arg.binding.as_ref(), &mut out);
    }
    out
}

fn outputs(module: &Module, ep: &naga::EntryPoint) -> Vec<(Slot, Option<FloatShape>)> {
    let mut out = Vec::new();
    if let Some(result) = &ep.function.result {
        flatten_io(module, result.ty, result.binding.as_ref(), &mut out);
    }
    out
}

fn check_vertex_inputs(
    family: ProgramFamily,
    module: &Module,
    ep: &naga::EntryPoint,
) -> Result<(), ShaderError> {
    let allowed: &[(u32, u8)] = match family {
        ProgramFamily::Scene => &SCENE_ATTRIBUTES,
        ProgramFamily::Post => &POST_ATTRIBUTES,
    };
    for (slot, shape) in inputs(module, ep) {
        let Slot::Location(location) = slot else {
            continue;
        };
        let Some(&(_, width)) = allowed.iter().find(|(loc, _)| *loc == location) else {
            return Err(link_err(format!(
                "vertex attribute @location({location}) is not provided to {family} programs"
            )));
        };
        if shape != Some(width) {
            return Err(link_err(format!(
                "vertex attribute @location({location}) must be {}, found {}",
                describe(Some(width)),
                describe(shape)
            )));
        }
    }
    Ok(())
}

fn check_varyings(
    vs_module: &Module,
    vs: &naga::EntryPoint,
    fs_module: &Module,
    fs: &naga::EntryPoint,
) -> Result<(), ShaderError> {
    let produced = outputs(vs_module, vs);
    if !produced.iter().any(|(slot, _)| *slot == Slot::Position) {
        return Err(link_err(
            "vertex stage does not write @builtin(position)".to_string(),
        ));
    }
    for (slot, shape) in inputs(fs_module, fs) {
        let Slot::Location(location) = slot else {
            continue;
        };
        match produced.iter().find(|(s, _)| *s == slot) {
            None => {
                return Err(link_err(format!(
                    "fragment input @location({location}) is not written by the vertex stage"
                )));
            }
            Some((_, written)) if *written != shape => {
                return Err(link_err(format!(
                    "fragment input @location({location}) is {} but the vertex stage writes {}",
                    describe(shape),
                    describe(*written)
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

fn check_fragment_output(module: &Module, ep: &naga::EntryPoint) -> Result<(), ShaderError> {
    let mut color = false;
    for (slot, shape) in outputs(module, ep) {
        match slot {
            Slot::Location(0) if shape == Some(4) => color = true,
            Slot::Location(0) => {
                return Err(link_err(format!(
                    "fragment output @location(0) must be vec4<f32>, found {}",
                    describe(shape)
                )));
            }
            Slot::Location(location) => {
                return Err(link_err(format!(
                    "fragment output @location({location}) has no colour target"
                )));
            }
            Slot::Position | Slot::Other => {}
        }
    }
    if color {
        Ok(())
    } else {
        Err(link_err(
            "fragment stage does not write @location(0)".to_string(),
        ))
    }
}

fn collect_bindings(module: &Module, bindings: &mut UniformBindings) -> Result<(), ShaderError> {
    for (_, var) in module.global_variables.iter() {
        let Some(rb) = &var.binding else {
            continue;
        };
        let name = var.name.clone().unwrap_or_default();
        let inner = &module.types[var.ty].inner;
        if rb.group != BIND_GROUP {
            return Err(link_err(format!(
                "'{name}' uses @group({}); only @group({BIND_GROUP}) is bound",
                rb.group
            )));
        }
        match rb.binding {
            FRAME_UNIFORMS_BINDING => {
                if var.space != AddressSpace::Uniform {
                    return Err(link_err(format!(
                        "@binding({FRAME_UNIFORMS_BINDING}) '{name}' must be var<uniform>"
                    )));
                }
                check_frame_block(module, inner)?;
                bindings.frame.get_or_insert(name);
            }
            TEXTURE_BINDING => {
                let sampled_2d = matches!(
                    *inner,
                    TypeInner::Image {
                        dim: ImageDimension::D2,
                        arrayed: false,
                        class: ImageClass::Sampled {
                            kind: ScalarKind::Float,
                            multi: false,
                        },
                    }
                );
                if !sampled_2d {
                    return Err(link_err(format!(
                        "@binding({TEXTURE_BINDING}) '{name}' must be texture_2d<f32>"
                    )));
                }
                bindings.texture.get_or_insert(name);
            }
            SAMPLER_BINDING => {
                if !matches!(*inner, TypeInner::Sampler { comparison: false }) {
                    return Err(link_err(format!(
                        "@binding({SAMPLER_BINDING}) '{name}' must be a filtering sampler"
                    )));
                }
                bindings.sampler.get_or_insert(name);
            }
            other => {
                return Err(link_err(format!(
                    "'{name}' uses @binding({other}); bindings 0..=2 are available"
                )));
            }
        }
    }
    Ok(())
}

fn check_frame_block(module: &Module, inner: &TypeInner) -> Result<(), ShaderError> {
    let TypeInner::Struct { members, .. } = inner else {
        return Err(link_err(
            "frame uniform block must be a struct".to_string(),
        ));
    };
    for member in members {
        let name = member.name.as_deref().unwrap_or("<unnamed>");
        let Some(&(_, offset, width)) = FRAME_UNIFORM_MEMBERS
            .iter()
            .find(|(known, ..)| *known == name)
        else {
            return Err(link_err(format!(
                "unknown frame uniform member '{name}'"
            )));
        };
        let shape = float_shape(&module.types[member.ty].inner);
        if shape != Some(width) || member.offset != offset {
            return Err(link_err(format!(
                "frame uniform '{name}' must be {} at offset {offset}, found {} at offset {}",
                describe(Some(width)),
                describe(shape),
                member.offset
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const POST_VS: &str = r"
struct VertexOut {
    @builtin(position) clip: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> VertexOut {
    var out: VertexOut;
    out.clip = vec4<f32>(position, 0.0, 1.0);
    out.uv = uv;
    return out;
}
";

    const POST_FS: &str = r"
@group(0) @binding(1) var scene: texture_2d<f32>;
@group(0) @binding(2) var scene_sampler: sampler;

@fragment
fn fs_main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(scene, scene_sampler, uv);
}
";

    fn link_message(result: Result<ValidatedProgram, ShaderError>) -> String {
        match result {
            Err(ShaderError::Link { diagnostic }) => diagnostic,
            other => panic!("expected link error, got {other:?}"),
        }
    }

    #[test]
    fn split_stage_program_links() {
        let program = validate_program(ProgramFamily::Post, POST_VS, POST_FS).expect("links");
        assert_eq!(program.vertex.entry_point, "vs_main");
        assert_eq!(program.fragment.entry_point, "fs_main");
        assert_eq!(program.bindings.texture.as_deref(), Some("scene"));
        assert!(program.bindings.frame.is_none());
        assert!(program.bindings.samples_texture());
    }

    #[test]
    fn syntax_error_is_a_compile_error_for_that_stage() {
        let broken = POST_FS.replace("return textureSample", "return textureSample(");
        match validate_program(ProgramFamily::Post, POST_VS, &broken) {
            Err(ShaderError::Compile { stage, diagnostic }) => {
                assert_eq!(stage, ShaderStage::Fragment);
                assert!(!diagnostic.is_empty());
            }
            other => panic!("expected compile error, got {other:?}"),
        }
    }

    #[test]
    fn missing_entry_point_is_a_compile_error() {
        let result = validate_program(ProgramFamily::Post, POST_FS, POST_FS);
        assert!(matches!(
            result,
            Err(ShaderError::Compile {
                stage: ShaderStage::Vertex,
                ..
            })
        ));
    }

    #[test]
    fn post_programs_cannot_read_scene_attributes() {
        let vs = POST_VS.replace(
            "@location(1) uv: vec2<f32>) -> VertexOut",
            "@location(1) uv: vec2<f32>, @location(2) color: vec4<f32>) -> VertexOut",
        );
        let message = link_message(validate_program(ProgramFamily::Post, &vs, POST_FS));
        assert!(message.contains("@location(2)"), "{message}");
    }

    #[test]
    fn attribute_type_must_match() {
        let vs = POST_VS.replace("@location(1) uv: vec2<f32>)", "@location(1) uv: vec4<f32>)");
        let vs = vs.replace("out.uv = uv;", "out.uv = uv.xy;");
        let message = link_message(validate_program(ProgramFamily::Post, &vs, POST_FS));
        assert!(message.contains("must be vec2<f32>"), "{message}");
    }

    #[test]
    fn unmatched_varying_fails_to_link() {
        let fs = POST_FS.replace("@location(0) uv: vec2<f32>", "@location(3) uv: vec2<f32>");
        let message = link_message(validate_program(ProgramFamily::Post, POST_VS, &fs));
        assert!(message.contains("not written by the vertex stage"), "{message}");
    }

    #[test]
    fn wrong_binding_slot_fails_to_link() {
        let fs = POST_FS.replace("@binding(2) var scene_sampler", "@binding(5) var scene_sampler");
        let message = link_message(validate_program(ProgramFamily::Post, POST_VS, &fs));
        assert!(message.contains("@binding(5)"), "{message}");
    }

    #[test]
    fn uniform_block_offsets_are_checked() {
        let fs = format!(
            "struct FrameUniforms {{ time: f32, resolution: vec2<f32> }};\n\
             @group(0) @binding(0) var<uniform> frame: FrameUniforms;\n{POST_FS}"
        );
        let message = link_message(validate_program(ProgramFamily::Post, POST_VS, &fs));
        assert!(message.contains("frame uniform"), "{message}");
    }
}
