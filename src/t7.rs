//! Reader for the Torch7 serialized object format (`.t7`).
//!
//! The format is a stream of tagged, little-endian records. Compound
//! values (tables, torch objects, functions) carry a global index used for
//! back-references, so shared storages and repeated sub-objects decode to
//! shared values here as well. Tensors serialize as metadata plus a
//! reference to a storage object holding the raw elements; strided or
//! offset views are materialized row-major when converted to tensor data.
//!
//! Only the pieces a serialized `nn` module list needs are implemented:
//! primitives, tables, tensors and storages of the numeric element types,
//! and generic torch classes (whose payload is their field table).
//! Function bodies are skipped.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::rc::Rc;

use burn::tensor::TensorData;
use byteorder::{LittleEndian, ReadBytesExt};
use thiserror::Error;

const TYPE_NIL: i32 = 0;
const TYPE_NUMBER: i32 = 1;
const TYPE_STRING: i32 = 2;
const TYPE_TABLE: i32 = 3;
const TYPE_TORCH: i32 = 4;
const TYPE_BOOLEAN: i32 = 5;
const TYPE_FUNCTION: i32 = 6;
const TYPE_LEGACY_RECUR_FUNCTION: i32 = 7;
const TYPE_RECUR_FUNCTION: i32 = 8;

#[derive(Error, Debug)]
pub enum T7Error {
    #[error("failed to read t7 stream")]
    Io(#[from] std::io::Error),

    #[error("unknown object tag {0}")]
    UnknownTag(i32),

    #[error("negative length {0}")]
    BadLength(i64),

    #[error("string is not valid utf-8")]
    BadString(#[from] std::string::FromUtf8Error),

    #[error("back-reference {0} points at nothing")]
    BadIndex(i32),

    #[error("unsupported torch class `{0}`")]
    UnsupportedClass(String),

    #[error("tensor has no storage")]
    MissingStorage,

    #[error("tensor indexes past the end of its storage")]
    StorageBounds,

    #[error("expected {expected}, found {found}")]
    Unexpected { expected: String, found: String },
}

/// A decoded Torch7 value.
#[derive(Debug, Clone)]
pub enum T7Value {
    Nil,
    Boolean(bool),
    Number(f64),
    Str(String),
    Table(Rc<T7Table>),
    Object(Rc<T7Object>),
    Tensor(Rc<T7Tensor>),
    Storage(Rc<T7Storage>),
    /// A serialized closure; the dumped body is discarded.
    Function,
}

impl T7Value {
    pub fn kind_name(&self) -> &'static str {
        match self {
            T7Value::Nil => "nil",
            T7Value::Boolean(_) => "a boolean",
            T7Value::Number(_) => "a number",
            T7Value::Str(_) => "a string",
            T7Value::Table(_) => "a table",
            T7Value::Object(_) => "an object",
            T7Value::Tensor(_) => "a tensor",
            T7Value::Storage(_) => "a storage",
            T7Value::Function => "a function",
        }
    }
}

/// A Lua table, with entries in stream order.
#[derive(Debug, Default)]
pub struct T7Table {
    pub entries: Vec<(T7Value, T7Value)>,
}

impl T7Table {
    /// Looks up a string-keyed field.
    pub fn get(&self, key: &str) -> Option<&T7Value> {
        self.entries.iter().find_map(|(k, v)| match k {
            T7Value::Str(s) if s == key => Some(v),
            _ => None,
        })
    }

    /// The list part: values under numeric keys, ordered by key.
    pub fn array(&self) -> Vec<&T7Value> {
        let mut keyed: Vec<(f64, &T7Value)> = self
            .entries
            .iter()
            .filter_map(|(k, v)| match k {
                T7Value::Number(n) => Some((*n, v)),
                _ => None,
            })
            .collect();
        keyed.sort_by(|a, b| a.0.total_cmp(&b.0));
        keyed.into_iter().map(|(_, v)| v).collect()
    }
}

/// A torch class instance: class name plus its serialized fields.
#[derive(Debug)]
pub struct T7Object {
    pub class: String,
    pub fields: T7Value,
}

impl T7Object {
    pub fn get(&self, key: &str) -> Option<&T7Value> {
        match &self.fields {
            T7Value::Table(table) => table.get(key),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericKind {
    Float,
    Double,
    Long,
    Int,
    Short,
    Char,
    Byte,
}

/// Tensor metadata plus a shared reference to its storage.
#[derive(Debug)]
pub struct T7Tensor {
    pub size: Vec<usize>,
    pub stride: Vec<usize>,
    /// Element offset into the storage (already 0-based).
    pub offset: usize,
    pub storage: Option<Rc<T7Storage>>,
}

impl T7Tensor {
    /// Materializes the view row-major into f32 tensor data.
    pub fn to_data(&self) -> Result<TensorData, T7Error> {
        if self.size.is_empty() {
            return Ok(TensorData::new(Vec::<f32>::new(), vec![0]));
        }

        let storage = self.storage.as_ref().ok_or(T7Error::MissingStorage)?;
        let count = self.size.iter().product();
        let mut values = Vec::with_capacity(count);
        let mut index = vec![0usize; self.size.len()];

        loop {
            let flat: usize = self.offset
                + index
                    .iter()
                    .zip(&self.stride)
                    .map(|(i, s)| i * s)
                    .sum::<usize>();
            let value = *storage.values.get(flat).ok_or(T7Error::StorageBounds)?;
            values.push(value as f32);

            let mut dim = self.size.len();
            loop {
                if dim == 0 {
                    return Ok(TensorData::new(values, self.size.clone()));
                }
                dim -= 1;
                index[dim] += 1;
                if index[dim] < self.size[dim] {
                    break;
                }
                index[dim] = 0;
            }
        }
    }
}

/// A storage: the flat element buffer tensors view into.
#[derive(Debug)]
pub struct T7Storage {
    pub kind: NumericKind,
    pub values: Vec<f64>,
}

fn tensor_kind(class: &str) -> Option<NumericKind> {
    match class {
        "torch.FloatTensor" | "torch.CudaTensor" => Some(NumericKind::Float),
        "torch.DoubleTensor" => Some(NumericKind::Double),
        "torch.LongTensor" => Some(NumericKind::Long),
        "torch.IntTensor" => Some(NumericKind::Int),
        "torch.ShortTensor" => Some(NumericKind::Short),
        "torch.CharTensor" => Some(NumericKind::Char),
        "torch.ByteTensor" => Some(NumericKind::Byte),
        _ => None,
    }
}

fn storage_kind(class: &str) -> Option<NumericKind> {
    match class {
        "torch.FloatStorage" | "torch.CudaStorage" => Some(NumericKind::Float),
        "torch.DoubleStorage" => Some(NumericKind::Double),
        "torch.LongStorage" => Some(NumericKind::Long),
        "torch.IntStorage" => Some(NumericKind::Int),
        "torch.ShortStorage" => Some(NumericKind::Short),
        "torch.CharStorage" => Some(NumericKind::Char),
        "torch.ByteStorage" => Some(NumericKind::Byte),
        _ => None,
    }
}

pub struct T7Reader<R: Read> {
    input: R,
    memo: HashMap<i32, T7Value>,
}

impl<R: Read> T7Reader<R> {
    pub fn new(input: R) -> Self {
        T7Reader {
            input,
            memo: HashMap::new(),
        }
    }

    fn read_i32(&mut self) -> Result<i32, T7Error> {
        Ok(self.input.read_i32::<LittleEndian>()?)
    }

    fn read_i64(&mut self) -> Result<i64, T7Error> {
        Ok(self.input.read_i64::<LittleEndian>()?)
    }

    fn read_f64(&mut self) -> Result<f64, T7Error> {
        Ok(self.input.read_f64::<LittleEndian>()?)
    }

    fn read_len(&mut self) -> Result<usize, T7Error> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(T7Error::BadLength(len as i64));
        }
        Ok(len as usize)
    }

    fn read_string(&mut self) -> Result<String, T7Error> {
        let len = self.read_len()?;
        let mut buf = vec![0u8; len];
        self.input.read_exact(&mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    /// Reads the next tagged value from the stream.
    pub fn read_value(&mut self) -> Result<T7Value, T7Error> {
        let tag = self.read_i32()?;
        match tag {
            TYPE_NIL => Ok(T7Value::Nil),
            TYPE_NUMBER => Ok(T7Value::Number(self.read_f64()?)),
            TYPE_STRING => Ok(T7Value::Str(self.read_string()?)),
            TYPE_BOOLEAN => Ok(T7Value::Boolean(self.read_i32()? == 1)),
            TYPE_TABLE => {
                let index = self.read_i32()?;
                if let Some(seen) = self.memo.get(&index) {
                    return Ok(seen.clone());
                }
                self.read_table(index)
            }
            TYPE_TORCH => {
                let index = self.read_i32()?;
                if let Some(seen) = self.memo.get(&index) {
                    return Ok(seen.clone());
                }
                self.read_torch(index)
            }
            TYPE_FUNCTION | TYPE_RECUR_FUNCTION | TYPE_LEGACY_RECUR_FUNCTION => {
                let index = self.read_i32()?;
                if let Some(seen) = self.memo.get(&index) {
                    return Ok(seen.clone());
                }
                self.read_function(index)
            }
            other => Err(T7Error::UnknownTag(other)),
        }
    }

    fn read_table(&mut self, index: i32) -> Result<T7Value, T7Error> {
        let count = self.read_len()?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let key = self.read_value()?;
            let value = self.read_value()?;
            entries.push((key, value));
        }
        let value = T7Value::Table(Rc::new(T7Table { entries }));
        self.memo.insert(index, value.clone());
        Ok(value)
    }

    fn read_torch(&mut self, index: i32) -> Result<T7Value, T7Error> {
        // Versioned objects write "V <n>" then the class name; legacy
        // objects write the class name directly.
        let version = self.read_string()?;
        let class = if version.starts_with("V ") {
            self.read_string()?
        } else {
            version
        };

        let value = if tensor_kind(&class).is_some() {
            self.read_tensor()?
        } else if let Some(kind) = storage_kind(&class) {
            self.read_storage(kind)?
        } else if class.starts_with("torch.") {
            // non-nn torch classes have custom binary payloads this reader
            // does not know how to skip
            return Err(T7Error::UnsupportedClass(class));
        } else {
            let fields = self.read_value()?;
            T7Value::Object(Rc::new(T7Object { class, fields }))
        };

        self.memo.insert(index, value.clone());
        Ok(value)
    }

    fn read_tensor(&mut self) -> Result<T7Value, T7Error> {
        let ndim = {
            let n = self.read_i32()?;
            if n < 0 {
                return Err(T7Error::BadLength(n as i64));
            }
            n as usize
        };

        let mut size = Vec::with_capacity(ndim);
        for _ in 0..ndim {
            size.push(self.read_dim()?);
        }
        let mut stride = Vec::with_capacity(ndim);
        for _ in 0..ndim {
            stride.push(self.read_dim()?);
        }

        // stored 1-based; empty tensors store 0
        let offset = (self.read_i64()? - 1).max(0) as usize;

        let storage = match self.read_value()? {
            T7Value::Storage(storage) => Some(storage),
            T7Value::Nil => None,
            other => {
                return Err(T7Error::Unexpected {
                    expected: "a storage".to_string(),
                    found: other.kind_name().to_string(),
                });
            }
        };

        Ok(T7Value::Tensor(Rc::new(T7Tensor {
            size,
            stride,
            offset,
            storage,
        })))
    }

    fn read_dim(&mut self) -> Result<usize, T7Error> {
        let dim = self.read_i64()?;
        if dim < 0 {
            return Err(T7Error::BadLength(dim));
        }
        Ok(dim as usize)
    }

    fn read_storage(&mut self, kind: NumericKind) -> Result<T7Value, T7Error> {
        let len = {
            let len = self.read_i64()?;
            if len < 0 {
                return Err(T7Error::BadLength(len));
            }
            len as usize
        };

        let mut values = Vec::with_capacity(len);
        for _ in 0..len {
            let value = match kind {
                NumericKind::Float => self.input.read_f32::<LittleEndian>()? as f64,
                NumericKind::Double => self.input.read_f64::<LittleEndian>()?,
                NumericKind::Long => self.input.read_i64::<LittleEndian>()? as f64,
                NumericKind::Int => self.input.read_i32::<LittleEndian>()? as f64,
                NumericKind::Short => self.input.read_i16::<LittleEndian>()? as f64,
                NumericKind::Char => self.input.read_i8()? as f64,
                NumericKind::Byte => self.input.read_u8()? as f64,
            };
            values.push(value);
        }

        Ok(T7Value::Storage(Rc::new(T7Storage { kind, values })))
    }

    fn read_function(&mut self, index: i32) -> Result<T7Value, T7Error> {
        // dumped bytecode, then the upvalue table
        let len = self.read_len()?;
        let mut dumped = vec![0u8; len];
        self.input.read_exact(&mut dumped)?;
        self.read_value()?;

        let value = T7Value::Function;
        self.memo.insert(index, value.clone());
        Ok(value)
    }
}

/// Decodes the single root value of a `.t7` file.
pub fn read_value_file(path: impl AsRef<Path>) -> Result<T7Value, T7Error> {
    let file = BufReader::new(File::open(path)?);
    T7Reader::new(file).read_value()
}

/// Decodes a `.t7` file expected to hold one tensor.
pub fn read_tensor_file(path: impl AsRef<Path>) -> Result<TensorData, T7Error> {
    match read_value_file(path)? {
        T7Value::Tensor(tensor) => tensor.to_data(),
        other => Err(T7Error::Unexpected {
            expected: "a tensor".to_string(),
            found: other.kind_name().to_string(),
        }),
    }
}
