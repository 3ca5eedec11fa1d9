//! Python entry points.
//!
//! `generate_json` takes the run parameters as a JSON string plus any
//! Python object implementing the renderer methods, and returns the run
//! summary as JSON. Renderer exceptions of type `TimeoutError` or
//! `ConnectionError` are treated as transient: a failed render is
//! retried, any other failed call rejects the current attempt. Anything
//! else is fatal.

use std::path::Path;

use pyo3::exceptions::{PyConnectionError, PyRuntimeError, PyTimeoutError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyTuple};

use crate::captions::{self, CaptionFile, CaptionMap};
use crate::directions::CameraAxes;
use crate::error::{GenError, RendererError};
use crate::renderer::{ObjectHandle, PixelBuffer, RenderMode, Renderer, RigElement};
use crate::types::{GenerationParams, PixelCoords, RenderSettings, Rgba, Vec3};

/// Renderer backed by a Python object.
struct PyRenderer<'py> {
    obj: Bound<'py, PyAny>,
}

fn renderer_error(py: Python<'_>, err: PyErr) -> RendererError {
    let msg = err.to_string();
    if err.is_instance_of::<PyTimeoutError>(py) || err.is_instance_of::<PyConnectionError>(py) {
        RendererError::Transient(msg)
    } else {
        RendererError::Fatal(msg)
    }
}

impl<'py> PyRenderer<'py> {
    fn call<A>(&self, method: &str, args: A) -> Result<Bound<'py, PyAny>, RendererError>
    where
        A: IntoPy<Py<PyTuple>>,
    {
        self.obj
            .call_method1(method, args)
            .map_err(|e| renderer_error(self.obj.py(), e))
    }

    fn extract<T: FromPyObject<'py>>(&self, value: Bound<'py, PyAny>) -> Result<T, RendererError> {
        value
            .extract()
            .map_err(|e| RendererError::Fatal(format!("unexpected renderer result: {e}")))
    }
}

fn rig_name(element: RigElement) -> &'static str {
    match element {
        RigElement::Camera => "camera",
        RigElement::KeyLight => "key_light",
        RigElement::FillLight => "fill_light",
        RigElement::BackLight => "back_light",
    }
}

fn path_str(path: &Path) -> Result<&str, RendererError> {
    path.to_str()
        .ok_or_else(|| RendererError::Fatal(format!("non UTF-8 path {}", path.display())))
}

impl Renderer for PyRenderer<'_> {
    fn open_base_scene(&mut self) -> Result<(), RendererError> {
        self.call("open_base_scene", ()).map(|_| ())
    }

    fn set_render_params(&mut self, settings: &RenderSettings) -> Result<(), RendererError> {
        let py = self.obj.py();
        let kwargs = PyDict::new_bound(py);
        let fill = || -> PyResult<()> {
            kwargs.set_item("engine", &settings.engine)?;
            kwargs.set_item("width", settings.width)?;
            kwargs.set_item("height", settings.height)?;
            kwargs.set_item("tile_size", settings.tile_size)?;
            kwargs.set_item("use_gpu", settings.use_gpu)?;
            kwargs.set_item("num_samples", settings.num_samples)?;
            kwargs.set_item("min_bounces", settings.min_bounces)?;
            kwargs.set_item("max_bounces", settings.max_bounces)?;
            Ok(())
        };
        fill().map_err(|e| renderer_error(py, e))?;
        self.obj
            .call_method("set_render_params", (), Some(&kwargs))
            .map(|_| ())
            .map_err(|e| renderer_error(py, e))
    }

    fn camera_axes(&self) -> Result<CameraAxes, RendererError> {
        let (behind, left, up): (Vec3, Vec3, Vec3) = self.extract(self.call("camera_axes", ())?)?;
        Ok(CameraAxes { behind, left, up })
    }

    fn translate_rig(&mut self, element: RigElement, offset: Vec3) -> Result<(), RendererError> {
        self.call("translate_rig", (rig_name(element), offset)).map(|_| ())
    }

    fn instantiate_object(
        &mut self,
        shape_asset: &str,
        radius: f64,
        position: (f64, f64),
        rotation_deg: f64,
    ) -> Result<ObjectHandle, RendererError> {
        let id: u64 = self.extract(self.call(
            "instantiate_object",
            (shape_asset, radius, position, rotation_deg),
        )?)?;
        Ok(ObjectHandle(id))
    }

    fn attach_material(
        &mut self,
        handle: ObjectHandle,
        material_asset: &str,
        rgba: Rgba,
    ) -> Result<(), RendererError> {
        self.call("attach_material", (handle.0, material_asset, rgba))
            .map(|_| ())
    }

    fn object_location(&self, handle: ObjectHandle) -> Result<Vec3, RendererError> {
        self.extract(self.call("object_location", (handle.0,))?)
    }

    fn project_to_screen(&self, handle: ObjectHandle) -> Result<PixelCoords, RendererError> {
        self.extract(self.call("project_to_screen", (handle.0,))?)
    }

    fn delete(&mut self, handle: ObjectHandle) -> Result<(), RendererError> {
        self.call("delete", (handle.0,)).map(|_| ())
    }

    fn enter_shadeless(
        &mut self,
        overrides: &[(ObjectHandle, [f32; 3])],
    ) -> Result<(), RendererError> {
        let list: Vec<(u64, [f32; 3])> = overrides.iter().map(|(h, c)| (h.0, *c)).collect();
        self.call("enter_shadeless", (list,)).map(|_| ())
    }

    fn exit_shadeless(&mut self) -> Result<(), RendererError> {
        self.call("exit_shadeless", ()).map(|_| ())
    }

    /// The Python side returns `None` or `(width, height, flat_rgba)`.
    fn render(&mut self, output_path: &Path, mode: RenderMode) -> Result<PixelBuffer, RendererError> {
        let mode = match mode {
            RenderMode::Final => "final",
            RenderMode::Shadeless => "shadeless",
        };
        let result = self.call("render", (path_str(output_path)?, mode))?;
        let image: Option<(u32, u32, Vec<f32>)> = self.extract(result)?;
        let Some((width, height, flat)) = image else {
            return Ok(PixelBuffer::default());
        };
        if flat.len() % 4 != 0 {
            return Err(RendererError::Fatal(format!(
                "pixel data length {} is not a multiple of 4",
                flat.len()
            )));
        }
        let pixels = flat
            .chunks_exact(4)
            .map(|c| [c[0], c[1], c[2], c[3]])
            .collect::<Vec<Rgba>>();
        Ok(PixelBuffer {
            width,
            height,
            pixels,
        })
    }

    fn save_session(&mut self, path: &Path) -> Result<(), RendererError> {
        self.call("save_session", (path_str(path)?,)).map(|_| ())
    }
}

fn to_py_err(err: GenError) -> PyErr {
    match err {
        GenError::Config(_) | GenError::Catalog(_) | GenError::Json(_) | GenError::Captions(_) => {
            PyValueError::new_err(err.to_string())
        }
        other => PyRuntimeError::new_err(other.to_string()),
    }
}

fn parse<T: serde::de::DeserializeOwned>(json: &str, what: &str) -> PyResult<T> {
    serde_json::from_str(json).map_err(|e| PyValueError::new_err(format!("Invalid {what} JSON: {e}")))
}

fn dump<T: serde::Serialize>(value: &T) -> PyResult<String> {
    serde_json::to_string(value)
        .map_err(|e| PyValueError::new_err(format!("Failed to serialize result: {e}")))
}

/// Run paired generation against a Python renderer object.
#[pyfunction]
fn generate_json(params_json: &str, renderer: Bound<'_, PyAny>) -> PyResult<String> {
    let params: GenerationParams = parse(params_json, "generation params")?;
    let mut renderer = PyRenderer { obj: renderer };
    let summary = crate::generate::generate(&params, &mut renderer).map_err(to_py_err)?;
    dump(&summary)
}

/// Takes a JSON list of question files, returns the image → captions map.
#[pyfunction]
fn collect_captions_json(files_json: &str) -> PyResult<String> {
    let files: Vec<CaptionFile> = parse(files_json, "caption files")?;
    dump(&captions::collect_captions(&files).map_err(to_py_err)?)
}

/// Takes a JSON list of caption maps, returns their union.
#[pyfunction]
fn merge_captions_json(maps_json: &str) -> PyResult<String> {
    let maps: Vec<CaptionMap> = parse(maps_json, "caption maps")?;
    dump(&captions::merge_captions(maps).map_err(to_py_err)?)
}

#[pyfunction]
#[pyo3(signature = (captions_json, seed = 123))]
fn split_indices_json(captions_json: &str, seed: u64) -> PyResult<String> {
    let caps: CaptionMap = parse(captions_json, "captions")?;
    dump(&captions::split_indices(&caps, seed).map_err(to_py_err)?)
}

#[pyfunction]
#[pyo3(name = "init_logging", signature = (level = "info"))]
fn init_logging_py(level: &str) -> bool {
    crate::init_logging(level)
}

#[pymodule]
fn scenegen_rs(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(generate_json, m)?)?;
    m.add_function(wrap_pyfunction!(collect_captions_json, m)?)?;
    m.add_function(wrap_pyfunction!(merge_captions_json, m)?)?;
    m.add_function(wrap_pyfunction!(split_indices_json, m)?)?;
    m.add_function(wrap_pyfunction!(init_logging_py, m)?)?;
    Ok(())
}
