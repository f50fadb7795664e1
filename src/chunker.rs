//! Troceado de documentos en chunks solapados de tamaño acotado.
//!
//! Las longitudes se miden en caracteres Unicode, nunca en bytes. Cada chunk
//! mide como mucho `chunk_size` caracteres y dos chunks consecutivos comparten
//! exactamente `chunk_overlap` caracteres, de modo que
//! `chunks[0] + chunks[1][overlap..] + ...` reconstruye el documento original.
//!
//! Al buscar el punto de corte se prefieren, por este orden, fronteras de
//! párrafo, de frase y de palabra; sólo si no hay ninguna se corta a mitad de
//! palabra.

use crate::{
    error::{RagError, Result},
    models::{Chunk, Document},
};

/// Fronteras de corte en orden de preferencia.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Paragraph,
    Sentence,
    Word,
}

impl Boundary {
    const PRIORITY: [Boundary; 3] = [Boundary::Paragraph, Boundary::Sentence, Boundary::Word];

    /// ¿Es `cut` (índice de carácter) un corte válido de este nivel?
    /// El separador queda siempre al final del chunk anterior.
    fn matches(self, chars: &[char], cut: usize) -> bool {
        let prev = chars[cut - 1];
        match self {
            Boundary::Paragraph => cut >= 2 && prev == '\n' && chars[cut - 2] == '\n',
            Boundary::Sentence => {
                prev == '\n'
                    || (prev.is_whitespace() && cut >= 2 && matches!(chars[cut - 2], '.' | '!' | '?'))
            }
            Boundary::Word => prev.is_whitespace(),
        }
    }
}

/// Divisor recursivo de texto (párrafo → frase → palabra → carácter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    /// Crea el divisor validando los tamaños.
    ///
    /// # Errors
    ///
    /// [`RagError::Configuration`] si `chunk_size == 0` o si
    /// `chunk_overlap >= chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::Configuration(
                "chunk_size debe ser mayor que cero".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::Configuration(format!(
                "chunk_overlap ({chunk_overlap}) debe ser menor que chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Devuelve la secuencia de chunks del documento. Se consume una sola vez.
    pub fn split<'a>(&self, document: &'a Document) -> Chunks<'a> {
        let mut offsets: Vec<usize> = document.text.char_indices().map(|(i, _)| i).collect();
        offsets.push(document.text.len());
        Chunks {
            document,
            chars: document.text.chars().collect(),
            offsets,
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            start: 0,
            position: 0,
            done: document.text.is_empty(),
        }
    }
}

/// Iterador de chunks de un documento.
#[derive(Debug)]
pub struct Chunks<'a> {
    document: &'a Document,
    chars: Vec<char>,
    /// Offset en bytes de cada carácter, más `text.len()` al final.
    offsets: Vec<usize>,
    chunk_size: usize,
    chunk_overlap: usize,
    start: usize,
    position: usize,
    done: bool,
}

impl Chunks<'_> {
    /// Busca el corte más tardío dentro de la ventana, nivel a nivel.
    ///
    /// La ventana empieza en `max(overlap + 1, chunk_size / 2)` para que cada
    /// chunk avance y no se generen trozos diminutos por un salto de párrafo
    /// temprano.
    fn find_cut(&self) -> usize {
        let hard = self.start + self.chunk_size;
        let min_len = (self.chunk_overlap + 1).max(self.chunk_size / 2);
        let lowest = self.start + min_len;

        Boundary::PRIORITY
            .iter()
            .find_map(|level| {
                (lowest..=hard)
                    .rev()
                    .find(|&cut| level.matches(&self.chars, cut))
            })
            .unwrap_or(hard)
    }
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }

        let total = self.chars.len();
        let end = if total - self.start <= self.chunk_size {
            self.done = true;
            total
        } else {
            self.find_cut()
        };

        let text = &self.document.text[self.offsets[self.start]..self.offsets[end]];
        let chunk = Chunk {
            text: text.to_string(),
            source: self.document.source.clone(),
            sequence_position: self.position,
        };

        self.position += 1;
        if !self.done {
            self.start = end - self.chunk_overlap;
        }
        Some(chunk)
    }
}

impl std::iter::FusedIterator for Chunks<'_> {}
