use crate::link::Program;
use crate::token::Token;
use std::io;
use std::io::Write;

impl<T: Token> Program<T> {
    /// Writes the control-flow graph of the program in graphviz format.
    pub fn output_dot(&self, w: &mut impl Write) -> io::Result<()> {
        writeln!(w, "digraph {{")?;

        let code = self.instructions();
        for (src, instr) in code.iter().enumerate() {
            let label = instr.to_string().replace('\\', "\\\\").replace('"', "\\\"");
            let attrs = if matches!(instr, crate::instruction::Instr::Return) {
                ", shape=doublecircle"
            } else {
                ""
            };
            writeln!(w, "node[label=\"{src}: {label}\"{attrs}] id{src}")?;

            if !instr.is_terminal() && src + 1 < code.len() {
                writeln!(w, "id{src} -> id{}", src + 1)?;
            }
            for tgt in instr.targets() {
                writeln!(w, "id{src} -> id{tgt} [style=dashed]")?;
            }
        }

        writeln!(w, "}}")?;

        Ok(())
    }
}
